use std::sync::Arc;

use tracing::{debug, instrument};

use super::{Route, Shared};
use crate::backend::{Backend, BackendError, TransferStatus, write_all};
use crate::error::VaultError;
use crate::fs::file::{DIR_ID_BACKUP_FILE, encrypt_dir_id_backup};
use crate::vault::path::RemotePath;
use crate::vault::registry::VaultRegistry;

/// Directory creation.
///
/// Writes, in order: the long-name side file if any, `dir.c9r` with a new id
/// (through the directory id store's create protocol), then the encrypted id
/// backup that marks the new storage directory.
pub struct CryptoDirectoryFeature {
    shared: Shared,
}

impl CryptoDirectoryFeature {
    pub fn new(backend: Arc<dyn Backend>, registry: Arc<VaultRegistry>) -> Self {
        Self {
            shared: Shared::new(backend, registry),
        }
    }

    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub fn mkdir(&self, path: &RemotePath) -> Result<(), VaultError> {
        let route = match self.shared.route(path)? {
            Route::Plain(path) => return Ok(self.shared.backend.mkdir(&path)?),
            Route::Vault(route) => route,
        };
        let backend = &*self.shared.backend;
        let translator = route.translator();
        if route.relative.is_root() {
            return Err(BackendError::AlreadyExists { path: path.clone() }.into());
        }

        let entry = route.entry(backend, "mkdir")?;
        if translator.node_kind(backend, &entry)?.is_some() {
            return Err(BackendError::AlreadyExists { path: path.clone() }.into());
        }
        if let Some(name_file) = entry.name_file() {
            write_all(
                backend,
                &name_file,
                entry.name.full_name().as_bytes(),
                &TransferStatus::new(),
            )?;
        }

        let (dir_id, created) = translator
            .dir_ids()
            .load_or_create(backend, &entry.dir_id_file())?;
        let storage = translator.storage_path(&dir_id)?;
        let backup = encrypt_dir_id_backup(&dir_id, route.unlocked.master_key())?;
        match write_all(
            backend,
            &storage.join(DIR_ID_BACKUP_FILE),
            &backup,
            &TransferStatus::new().exclusive(),
        ) {
            Ok(()) => {}
            Err(e) if !created && e.is_already_exists() => {}
            Err(e) => return Err(e.into()),
        }
        debug!(dir_id = %dir_id, created, storage = %storage, "Created directory");
        Ok(())
    }
}
