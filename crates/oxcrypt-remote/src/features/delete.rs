use std::sync::Arc;

use tracing::{debug, info, instrument, trace};

use super::{Route, Shared, VaultRoute, ignore_missing};
use crate::backend::{Backend, BackendError, EntryKind};
use crate::error::VaultError;
use crate::fs::file::DIR_ID_BACKUP_FILE;
use crate::fs::name::{C9R_EXTENSION, C9S_EXTENSION, NAME_FILE};
use crate::vault::config::VAULT_CONFIG_FILENAME;
use crate::vault::crypto_vault::UnlockedVault;
use crate::vault::dir_id::DIR_ID_FILE;
use crate::vault::path::{DirId, RemotePath};
use crate::vault::registry::VaultRegistry;
use crate::vault::translator::{CONTENTS_FILE, DATA_DIR};

/// Recursive deletes.
///
/// A directory's content goes first and its id files last, so a delete that
/// fails halfway leaves a directory that still resolves and can be retried.
pub struct CryptoDeleteFeature {
    shared: Shared,
}

impl CryptoDeleteFeature {
    pub fn new(backend: Arc<dyn Backend>, registry: Arc<VaultRegistry>) -> Self {
        Self {
            shared: Shared::new(backend, registry),
        }
    }

    /// Delete every path in order, calling `deleted` after each one.
    ///
    /// Deleting a vault root removes the whole vault, key file last, and
    /// unregisters it.
    #[instrument(level = "debug", skip(self, paths, deleted), fields(count = paths.len()))]
    pub fn delete(
        &self,
        paths: &[RemotePath],
        deleted: &mut dyn FnMut(&RemotePath),
    ) -> Result<(), VaultError> {
        for path in paths {
            match self.shared.route(path)? {
                Route::Plain(path) => {
                    let backend = &*self.shared.backend;
                    if !backend.find(&path)? {
                        return Err(BackendError::NotFound { path }.into());
                    }
                    delete_tree(backend, &path)?;
                }
                Route::Vault(route) if route.relative.is_root() => self.delete_vault(&route)?,
                Route::Vault(route) => self.delete_node(&route)?,
            }
            debug!(path = %path, "Deleted");
            deleted(path);
        }
        Ok(())
    }

    fn delete_node(&self, route: &VaultRoute) -> Result<(), VaultError> {
        let backend = &*self.shared.backend;
        let vault = &*route.unlocked;
        let translator = route.translator();
        let entry = route.entry(backend, "delete")?;
        let kind = translator
            .node_kind(backend, &entry)?
            .ok_or_else(|| route.not_found("delete", &entry.entry))?;

        match kind {
            EntryKind::File => backend.delete(&entry.file_blob())?,
            EntryKind::Directory => {
                let dir_id = translator.dir_ids().load(backend, &entry.dir_id_file())?;
                delete_directory(backend, vault, &dir_id)?;
                backend.delete(&entry.dir_id_file())?;
                translator.dir_ids().invalidate(&entry.dir_id_file());
            }
        }
        if let Some(name_file) = entry.name_file() {
            ignore_missing(backend.delete(&name_file))?;
        }
        if entry.is_shortened() || kind == EntryKind::Directory {
            ignore_missing(backend.delete(&entry.entry))?;
        }
        Ok(())
    }

    fn delete_vault(&self, route: &VaultRoute) -> Result<(), VaultError> {
        let backend = &*self.shared.backend;
        let vault = &*route.unlocked;
        let root = vault.root();

        delete_directory(backend, vault, &DirId::root())?;
        delete_tree(backend, &root.join(DATA_DIR))?;
        ignore_missing(backend.delete(&root.join(VAULT_CONFIG_FILENAME)))?;
        ignore_missing(backend.delete(&root.join(vault.masterkey_filename())))?;
        match ignore_root(root).map_or(Ok(()), |root| backend.delete(root)) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(BackendError::DirectoryNotEmpty { .. }) => {
                debug!(root = %root, "Vault root holds foreign objects, left in place");
            }
            Err(e) => return Err(e.into()),
        }

        vault.translator().dir_ids().invalidate_prefix(root);
        self.shared.registry.remove(root);
        route.vault.lock();
        info!(root = %root, "Deleted vault");
        Ok(())
    }
}

/// The backend root itself is never deleted.
fn ignore_root(path: &RemotePath) -> Option<&RemotePath> {
    (!path.is_root()).then_some(path)
}

/// Remove a directory's children, then its id backup and storage folder.
fn delete_directory(
    backend: &dyn Backend,
    vault: &UnlockedVault,
    dir_id: &DirId,
) -> Result<(), VaultError> {
    let translator = vault.translator();
    let storage = translator.storage_path(dir_id)?;
    let children = match backend.list(&storage) {
        Ok(children) => children,
        Err(e) if e.is_not_found() => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    for child in children {
        if child.name == DIR_ID_BACKUP_FILE {
            continue;
        }
        let path = storage.join(&child.name);
        if !child.attributes.is_dir() {
            backend.delete(&path)?;
            continue;
        }

        let id_file = path.join(DIR_ID_FILE);
        let is_entry = child.name.ends_with(C9R_EXTENSION) || child.name.ends_with(C9S_EXTENSION);
        if is_entry && backend.find(&id_file)? {
            let child_id = translator.dir_ids().load(backend, &id_file)?;
            delete_directory(backend, vault, &child_id)?;
            backend.delete(&id_file)?;
            translator.dir_ids().invalidate(&id_file);
        }
        ignore_missing(backend.delete(&path.join(CONTENTS_FILE)))?;
        ignore_missing(backend.delete(&path.join(NAME_FILE)))?;
        delete_tree(backend, &path)?;
    }

    ignore_missing(backend.delete(&storage.join(DIR_ID_BACKUP_FILE)))?;
    ignore_missing(backend.delete(&storage))?;
    trace!(dir_id = %dir_id, "Deleted directory storage");
    Ok(())
}

/// Depth-first delete of a plain backend tree. Missing paths are fine.
fn delete_tree(backend: &dyn Backend, path: &RemotePath) -> Result<(), VaultError> {
    let attributes = match backend.attributes(path) {
        Ok(attributes) => attributes,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if attributes.is_dir() {
        for child in backend.list(path)? {
            delete_tree(backend, &path.join(&child.name))?;
        }
    }
    if !path.is_root() {
        ignore_missing(backend.delete(path))?;
    }
    Ok(())
}
