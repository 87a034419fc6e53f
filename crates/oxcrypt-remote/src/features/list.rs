use std::sync::Arc;

use tracing::{debug, instrument, trace, warn};

use super::{Route, Shared, VaultRoute};
use crate::backend::{Backend, RemoteAttributes, RemoteEntry, read_all};
use crate::error::{VaultError, VaultOpContext};
use crate::fs::chunk::plaintext_size;
use crate::fs::file::DIR_ID_BACKUP_FILE;
use crate::fs::name::{C9R_EXTENSION, C9S_EXTENSION, NAME_FILE, NameContext, NameError};
use crate::vault::dir_id::DIR_ID_FILE;
use crate::vault::path::RemotePath;
use crate::vault::registry::VaultRegistry;
use crate::vault::translator::{CONTENTS_FILE, ResolvedDirectory, VaultPathTranslator};

/// Receives listing results one entry at a time.
pub trait ListListener {
    /// A decoded child, with its full plaintext path.
    fn entry(&mut self, _path: &RemotePath, _attributes: &RemoteAttributes) {}

    /// A ciphertext child that could not be decoded; the listing continues.
    fn unreadable(&mut self, _encrypted: &RemotePath, _error: &VaultError) {}
}

impl ListListener for () {}

/// Keeps everything it is told.
#[derive(Debug, Default)]
pub struct CollectingListener {
    pub entries: Vec<RemotePath>,
    pub unreadable: Vec<(RemotePath, String)>,
}

impl ListListener for CollectingListener {
    fn entry(&mut self, path: &RemotePath, _attributes: &RemoteAttributes) {
        self.entries.push(path.clone());
    }

    fn unreadable(&mut self, encrypted: &RemotePath, error: &VaultError) {
        self.unreadable.push((encrypted.clone(), error.to_string()));
    }
}

/// Decrypting directory listings.
pub struct CryptoListFeature {
    shared: Shared,
}

impl CryptoListFeature {
    pub fn new(backend: Arc<dyn Backend>, registry: Arc<VaultRegistry>) -> Self {
        Self {
            shared: Shared::new(backend, registry),
        }
    }

    /// Children of `directory`, sorted by name.
    ///
    /// Undecodable entries are passed to `listener.unreadable` and left out
    /// of the result.
    #[instrument(level = "debug", skip(self, listener), fields(path = %directory))]
    pub fn list(
        &self,
        directory: &RemotePath,
        listener: &mut dyn ListListener,
    ) -> Result<Vec<RemoteEntry>, VaultError> {
        match self.shared.route(directory)? {
            Route::Plain(path) => {
                let entries = self.shared.backend.list(&path)?;
                for entry in &entries {
                    listener.entry(&path.join(&entry.name), &entry.attributes);
                }
                Ok(entries)
            }
            Route::Vault(route) => self.list_encrypted(&route, listener),
        }
    }

    fn list_encrypted(
        &self,
        route: &VaultRoute,
        listener: &mut dyn ListListener,
    ) -> Result<Vec<RemoteEntry>, VaultError> {
        let backend = &*self.shared.backend;
        let translator = route.translator();
        let directory = translator.resolve_directory(backend, &route.relative)?;
        let raw = backend.list(&directory.storage).map_err(|e| {
            if e.is_not_found() {
                route.not_found("list", &directory.storage)
            } else {
                e.into()
            }
        })?;

        let mut entries = Vec::with_capacity(raw.len());
        for child in raw {
            if child.name == DIR_ID_BACKUP_FILE {
                continue;
            }
            let encrypted = directory.storage.join(&child.name);
            match decode_entry(backend, translator, &directory, &child) {
                Ok(Some(entry)) => {
                    listener.entry(&route.path.join(&entry.name), &entry.attributes);
                    entries.push(entry);
                }
                Ok(None) => trace!(entry = %encrypted, "Skipping foreign entry"),
                Err(e) => {
                    warn!(entry = %encrypted, error = %e, "Unreadable directory entry");
                    listener.unreadable(&encrypted, &e);
                }
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// Decode one ciphertext child. `None` for objects that are not vault entries.
fn decode_entry(
    backend: &dyn Backend,
    translator: &VaultPathTranslator,
    directory: &ResolvedDirectory,
    child: &RemoteEntry,
) -> Result<Option<RemoteEntry>, VaultError> {
    let encrypted = directory.storage.join(&child.name);
    let context = || {
        VaultOpContext::new()
            .with_operation("list")
            .with_dir_id(&directory.dir_id)
            .with_encrypted_path(&encrypted)
    };
    let codec = translator.codec();

    if child.name.ends_with(C9R_EXTENSION) {
        let name = codec
            .decrypt_name(&directory.dir_id, &child.name)
            .map_err(|e| VaultError::name(e, context()))?;
        let attributes = if child.attributes.is_dir() {
            directory_attributes(&child.attributes)
        } else {
            file_attributes(&child.attributes, context)?
        };
        return Ok(Some(RemoteEntry { name, attributes }));
    }

    if child.name.ends_with(C9S_EXTENSION) && child.attributes.is_dir() {
        let full = read_all(backend, &encrypted.join(NAME_FILE))?;
        let full = String::from_utf8(full).map_err(|e| {
            VaultError::name(
                NameError::Utf8Decode {
                    reason: e.to_string(),
                    context: NameContext::new().with_encrypted_name(child.name.as_str()),
                },
                context(),
            )
        })?;
        let name = codec
            .decrypt_name(&directory.dir_id, full.trim())
            .map_err(|e| VaultError::name(e, context()))?;

        let contents = encrypted.join(CONTENTS_FILE);
        let attributes = match backend.attributes(&contents) {
            Ok(stored) => file_attributes(&stored, context)?,
            Err(e) if e.is_not_found() => {
                if !backend.find(&encrypted.join(DIR_ID_FILE))? {
                    // Name files are written first, so this is an
                    // interrupted create or move.
                    debug!(entry = %encrypted, "Shortened entry without contents, skipped");
                    return Ok(None);
                }
                directory_attributes(&child.attributes)
            }
            Err(e) => return Err(e.into()),
        };
        return Ok(Some(RemoteEntry { name, attributes }));
    }

    Ok(None)
}

fn directory_attributes(stored: &RemoteAttributes) -> RemoteAttributes {
    RemoteAttributes::directory()
        .with_modified(stored.modified)
        .with_created(stored.created)
}

fn file_attributes(
    stored: &RemoteAttributes,
    context: impl Fn() -> VaultOpContext,
) -> Result<RemoteAttributes, VaultError> {
    let size = plaintext_size(stored.size).ok_or_else(|| VaultError::InvalidCiphertextSize {
        size: stored.size,
        context: context(),
    })?;
    Ok(RemoteAttributes::file(size)
        .with_modified(stored.modified)
        .with_created(stored.created))
}
