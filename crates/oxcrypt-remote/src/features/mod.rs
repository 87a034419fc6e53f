//! Vault-aware decorators over a backend's capabilities.
//!
//! Every decorator takes plaintext paths. Paths outside any registered vault
//! go to the backend unchanged; paths inside one are translated and their
//! streams wrapped with the content cipher. A locked vault fails before any
//! backend call is made.

pub mod attributes;
pub mod delete;
pub mod directory;
pub mod find;
pub mod list;
pub mod read;
pub mod rename;
pub mod touch;
pub mod write;

use std::sync::Arc;

use crate::backend::{Backend, BackendError};
use crate::error::{VaultError, VaultOpContext};
use crate::vault::crypto_vault::{CryptoVault, UnlockedVault};
use crate::vault::path::RemotePath;
use crate::vault::registry::VaultRegistry;
use crate::vault::translator::{CiphertextEntry, VaultPathTranslator};

pub use attributes::CryptoAttributesFeature;
pub use delete::CryptoDeleteFeature;
pub use directory::CryptoDirectoryFeature;
pub use find::CryptoFindFeature;
pub use list::{CollectingListener, CryptoListFeature, ListListener};
pub use read::CryptoReadFeature;
pub use rename::CryptoMoveFeature;
pub use touch::CryptoTouchFeature;
pub use write::CryptoWriteFeature;

/// A plaintext path inside an unlocked vault.
pub(crate) struct VaultRoute {
    pub vault: Arc<CryptoVault>,
    pub unlocked: Arc<UnlockedVault>,
    /// Below the vault root; empty for the root itself
    pub relative: RemotePath,
    /// As the caller gave it
    pub path: RemotePath,
}

impl VaultRoute {
    pub fn translator(&self) -> &VaultPathTranslator {
        self.unlocked.translator()
    }

    pub fn context(&self, operation: &'static str) -> VaultOpContext {
        VaultOpContext::new()
            .with_operation(operation)
            .with_path(&self.path)
    }

    /// Entry of a non-root path.
    pub fn entry(&self, backend: &dyn Backend, operation: &'static str) -> Result<CiphertextEntry, VaultError> {
        if self.relative.is_root() {
            return Err(VaultError::interop(
                "operation not applicable to the vault root",
                self.context(operation),
            ));
        }
        self.translator().resolve(backend, &self.relative)
    }

    /// `NotFound` for this path, naming the ciphertext location.
    pub fn not_found(&self, operation: &'static str, encrypted: &RemotePath) -> VaultError {
        VaultError::not_found(self.context(operation).with_encrypted_path(encrypted))
    }
}

pub(crate) enum Route {
    Plain(RemotePath),
    Vault(VaultRoute),
}

/// Decide who serves `path`. Locked vaults fail here, without backend I/O.
pub(crate) fn route(registry: &VaultRegistry, path: &RemotePath) -> Result<Route, VaultError> {
    match registry.find(path) {
        None => Ok(Route::Plain(path.clone())),
        Some((vault, relative)) => {
            let unlocked = vault.unlocked()?;
            Ok(Route::Vault(VaultRoute {
                vault,
                unlocked,
                relative,
                path: path.clone(),
            }))
        }
    }
}

/// Treat a missing object as already gone.
pub(crate) fn ignore_missing(result: Result<(), BackendError>) -> Result<(), BackendError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// The backend and registry every decorator works against.
#[derive(Clone)]
pub(crate) struct Shared {
    pub backend: Arc<dyn Backend>,
    pub registry: Arc<VaultRegistry>,
}

impl Shared {
    pub fn new(backend: Arc<dyn Backend>, registry: Arc<VaultRegistry>) -> Self {
        Self { backend, registry }
    }

    pub fn route(&self, path: &RemotePath) -> Result<Route, VaultError> {
        route(&self.registry, path)
    }
}
