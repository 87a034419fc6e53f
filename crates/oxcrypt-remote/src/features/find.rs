use std::sync::Arc;

use tracing::instrument;

use super::{Route, Shared};
use crate::backend::Backend;
use crate::error::VaultError;
use crate::vault::path::RemotePath;
use crate::vault::registry::VaultRegistry;

/// Existence checks on plaintext paths.
pub struct CryptoFindFeature {
    shared: Shared,
}

impl CryptoFindFeature {
    pub fn new(backend: Arc<dyn Backend>, registry: Arc<VaultRegistry>) -> Self {
        Self {
            shared: Shared::new(backend, registry),
        }
    }

    #[instrument(level = "trace", skip(self), fields(path = %path))]
    pub fn find(&self, path: &RemotePath) -> Result<bool, VaultError> {
        let route = match self.shared.route(path)? {
            Route::Plain(path) => return Ok(self.shared.backend.find(&path)?),
            Route::Vault(route) => route,
        };
        if route.relative.is_root() {
            return Ok(true);
        }

        let backend = &*self.shared.backend;
        let entry = match route.entry(backend, "find") {
            Ok(entry) => entry,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(route.translator().node_kind(backend, &entry)?.is_some())
    }
}
