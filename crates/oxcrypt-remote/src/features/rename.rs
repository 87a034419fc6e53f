use std::sync::Arc;

use tracing::{debug, instrument};

use super::{Route, Shared, VaultRoute, ignore_missing};
use crate::backend::{Backend, BackendError, EntryKind, TransferStatus, write_all};
use crate::error::VaultError;
use crate::vault::path::RemotePath;
use crate::vault::registry::VaultRegistry;

/// Renames within one vault.
///
/// Only the entry in the parent's storage moves. A directory keeps its id,
/// so its storage and everything below stay where they are.
pub struct CryptoMoveFeature {
    shared: Shared,
}

impl CryptoMoveFeature {
    pub fn new(backend: Arc<dyn Backend>, registry: Arc<VaultRegistry>) -> Self {
        Self {
            shared: Shared::new(backend, registry),
        }
    }

    #[instrument(level = "debug", skip(self), fields(source = %source, target = %target))]
    pub fn rename(&self, source: &RemotePath, target: &RemotePath) -> Result<(), VaultError> {
        match (self.shared.route(source)?, self.shared.route(target)?) {
            (Route::Plain(source), Route::Plain(target)) => {
                Ok(self.shared.backend.rename(&source, &target)?)
            }
            (Route::Vault(from), Route::Vault(to)) if Arc::ptr_eq(&from.vault, &to.vault) => {
                self.rename_encrypted(&from, &to)
            }
            (Route::Vault(from), _) => Err(VaultError::interop(
                format!("cannot move out of the vault at {}", from.vault.root()),
                from.context("move").with_encrypted_path(target),
            )),
            (Route::Plain(_), Route::Vault(to)) => Err(VaultError::interop(
                format!("cannot move into the vault at {}", to.vault.root()),
                to.context("move").with_encrypted_path(source),
            )),
        }
    }

    fn rename_encrypted(&self, from: &VaultRoute, to: &VaultRoute) -> Result<(), VaultError> {
        let backend = &*self.shared.backend;
        let translator = from.translator();

        let source = from.entry(backend, "move")?;
        let kind = translator
            .node_kind(backend, &source)?
            .ok_or_else(|| from.not_found("move", &source.entry))?;
        if kind == EntryKind::Directory && to.relative.starts_with(&from.relative) {
            return Err(VaultError::interop(
                "cannot move a directory into itself",
                from.context("move"),
            ));
        }

        let target = to.entry(backend, "move")?;
        if translator.node_kind(backend, &target)?.is_some() {
            return Err(BackendError::AlreadyExists {
                path: to.path.clone(),
            }
            .into());
        }

        if !source.is_shortened() && !target.is_shortened() {
            backend.rename(&source.entry, &target.entry)?;
        } else {
            // The target's name file goes first so its entry never exists
            // without one.
            if let Some(name_file) = target.name_file() {
                write_all(
                    backend,
                    &name_file,
                    target.name.full_name().as_bytes(),
                    &TransferStatus::new(),
                )?;
            }
            backend.rename(&source.payload(kind), &target.payload(kind))?;
            if let Some(name_file) = source.name_file() {
                ignore_missing(backend.delete(&name_file))?;
            }
            ignore_missing(backend.delete(&source.entry))?;
        }

        translator.dir_ids().invalidate(&source.dir_id_file());
        debug!(from = %source.entry, to = %target.entry, ?kind, "Moved entry");
        Ok(())
    }
}
