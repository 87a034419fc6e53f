use std::io::Read;
use std::sync::Arc;

use tracing::{debug, instrument};

use super::{Route, Shared, VaultRoute};
use crate::backend::Backend;
use crate::error::VaultError;
use crate::fs::chunk::{
    chunk_to_encrypted_offset, plaintext_to_chunk_number, plaintext_to_chunk_offset,
};
use crate::fs::file::FileContext;
use crate::fs::streaming::{DecryptingReader, read_header};
use crate::vault::path::RemotePath;
use crate::vault::registry::VaultRegistry;

/// Decrypting reads.
///
/// Reads from a non-zero offset fetch the header first, then open the blob
/// again at the ciphertext offset of the chunk holding `offset` and discard
/// the leading plaintext of that chunk.
pub struct CryptoReadFeature {
    shared: Shared,
}

impl CryptoReadFeature {
    pub fn new(backend: Arc<dyn Backend>, registry: Arc<VaultRegistry>) -> Self {
        Self {
            shared: Shared::new(backend, registry),
        }
    }

    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub fn read(&self, path: &RemotePath, offset: u64) -> Result<Box<dyn Read + Send>, VaultError> {
        match self.shared.route(path)? {
            Route::Plain(path) => Ok(self.shared.backend.read(&path, offset)?),
            Route::Vault(route) => self.read_encrypted(&route, offset),
        }
    }

    fn read_encrypted(
        &self,
        route: &VaultRoute,
        offset: u64,
    ) -> Result<Box<dyn Read + Send>, VaultError> {
        let backend = &*self.shared.backend;
        let entry = route.entry(backend, "read")?;
        let blob = entry.file_blob();
        let context = FileContext::new()
            .with_path(route.path.clone())
            .with_dir_id(&entry.parent_dir_id);

        let mut head = backend.read(&blob, 0).map_err(|e| {
            if e.is_not_found() {
                route.not_found("read", &blob)
            } else {
                e.into()
            }
        })?;
        let header = read_header(&mut *head, route.unlocked.master_key(), &context)?;

        if offset == 0 {
            return Ok(Box::new(DecryptingReader::new(head, &header, 0, 0, context)));
        }
        drop(head);

        let chunk = plaintext_to_chunk_number(offset);
        let skip = plaintext_to_chunk_offset(offset);
        debug!(chunk, skip, "Ranged read");
        let body = backend.read(&blob, chunk_to_encrypted_offset(chunk))?;
        Ok(Box::new(DecryptingReader::new(body, &header, chunk, skip, context)))
    }

    /// Read a whole file into memory.
    pub fn read_to_end(&self, path: &RemotePath) -> Result<Vec<u8>, VaultError> {
        let mut reader = self.read(path, 0)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).map_err(VaultError::from_io)?;
        Ok(buf)
    }
}
