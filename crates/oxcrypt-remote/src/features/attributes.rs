use std::sync::Arc;

use tracing::instrument;

use super::{Route, Shared};
use crate::backend::{Backend, EntryKind, RemoteAttributes};
use crate::error::VaultError;
use crate::fs::chunk::plaintext_size;
use crate::vault::path::RemotePath;
use crate::vault::registry::VaultRegistry;

/// Metadata with sizes converted to plaintext.
pub struct CryptoAttributesFeature {
    shared: Shared,
}

impl CryptoAttributesFeature {
    pub fn new(backend: Arc<dyn Backend>, registry: Arc<VaultRegistry>) -> Self {
        Self {
            shared: Shared::new(backend, registry),
        }
    }

    #[instrument(level = "trace", skip(self), fields(path = %path))]
    pub fn attributes(&self, path: &RemotePath) -> Result<RemoteAttributes, VaultError> {
        let route = match self.shared.route(path)? {
            Route::Plain(path) => return Ok(self.shared.backend.attributes(&path)?),
            Route::Vault(route) => route,
        };
        let backend = &*self.shared.backend;
        let translator = route.translator();

        if route.relative.is_root() {
            let storage = translator.root_directory()?.storage;
            return match backend.attributes(&storage) {
                Ok(stored) => Ok(RemoteAttributes::directory()
                    .with_modified(stored.modified)
                    .with_created(stored.created)),
                Err(e) if e.is_not_found() => Err(route.not_found("attributes", &storage)),
                Err(e) => Err(e.into()),
            };
        }

        let entry = route.entry(backend, "attributes")?;
        match translator.node_kind(backend, &entry)? {
            Some(EntryKind::File) => {
                let blob = entry.file_blob();
                let stored = backend.attributes(&blob)?;
                let size = plaintext_size(stored.size).ok_or_else(|| {
                    VaultError::InvalidCiphertextSize {
                        size: stored.size,
                        context: route.context("attributes").with_encrypted_path(&blob),
                    }
                })?;
                Ok(RemoteAttributes::file(size)
                    .with_modified(stored.modified)
                    .with_created(stored.created))
            }
            Some(EntryKind::Directory) => {
                let stored = backend.attributes(&entry.dir_id_file())?;
                Ok(RemoteAttributes::directory()
                    .with_modified(stored.modified)
                    .with_created(stored.created))
            }
            None => Err(route.not_found("attributes", &entry.entry)),
        }
    }
}
