use std::sync::Arc;

use tracing::{debug, instrument};

use super::write::CryptoWriteFeature;
use super::{Route, Shared};
use crate::backend::{Backend, TransferStatus};
use crate::error::VaultError;
use crate::vault::path::RemotePath;
use crate::vault::registry::VaultRegistry;

/// Creates empty files. Inside a vault an empty file is a header with no
/// chunks; an existing file is left untouched.
pub struct CryptoTouchFeature {
    shared: Shared,
    writer: CryptoWriteFeature,
}

impl CryptoTouchFeature {
    pub fn new(backend: Arc<dyn Backend>, registry: Arc<VaultRegistry>) -> Self {
        Self {
            writer: CryptoWriteFeature::new(Arc::clone(&backend), Arc::clone(&registry)),
            shared: Shared::new(backend, registry),
        }
    }

    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub fn touch(&self, path: &RemotePath) -> Result<(), VaultError> {
        let route = match self.shared.route(path)? {
            Route::Plain(path) => return Ok(self.shared.backend.touch(&path)?),
            Route::Vault(route) => route,
        };
        let backend = &*self.shared.backend;
        let entry = route.entry(backend, "touch")?;
        if route.translator().node_kind(backend, &entry)?.is_some() {
            debug!("Already exists");
            return Ok(());
        }

        let stream = self
            .writer
            .write(path, &TransferStatus::new().with_length(0))?;
        stream.finish().map_err(VaultError::from_io)
    }
}
