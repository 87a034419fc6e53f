use std::io::{self, Read, Write};
use std::sync::Arc;

use ring::digest;
use tracing::{debug, instrument};

use super::{Route, Shared, VaultRoute};
use crate::backend::{Append, Backend, TransferStatus, WriteStream, write_all};
use crate::crypto::nonce::{NonceGenerator, NonceMode, RandomNonceGenerator};
use crate::error::VaultError;
use crate::fs::chunk::{
    CHUNK_PLAINTEXT_SIZE, chunk_to_encrypted_offset, ciphertext_size, number_of_chunks,
    plaintext_size,
};
use crate::fs::file::{FileContext, FileHeader};
use crate::fs::streaming::{EncryptingWriter, StreamingContext, read_header};
use crate::vault::path::RemotePath;
use crate::vault::registry::VaultRegistry;

/// Committing the encrypted stream seals the last chunk, then commits the
/// backend upload.
impl WriteStream for EncryptingWriter<Box<dyn WriteStream>> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let inner = EncryptingWriter::finish(*self)?;
        inner.finish()
    }
}

/// Encrypting writes.
///
/// A write at offset 0 starts a new file: a header (from the transfer status
/// or freshly generated) followed by chunks. A write at a non-zero offset
/// resumes an existing file at a chunk boundary with the file's own header.
pub struct CryptoWriteFeature {
    shared: Shared,
}

impl CryptoWriteFeature {
    pub fn new(backend: Arc<dyn Backend>, registry: Arc<VaultRegistry>) -> Self {
        Self {
            shared: Shared::new(backend, registry),
        }
    }

    #[instrument(level = "debug", skip(self, status), fields(path = %path, offset = status.offset))]
    pub fn write(
        &self,
        path: &RemotePath,
        status: &TransferStatus,
    ) -> Result<Box<dyn WriteStream>, VaultError> {
        match self.shared.route(path)? {
            Route::Plain(path) => Ok(self.shared.backend.write(&path, status)?),
            Route::Vault(route) => self.write_encrypted(&route, status),
        }
    }

    fn write_encrypted(
        &self,
        route: &VaultRoute,
        status: &TransferStatus,
    ) -> Result<Box<dyn WriteStream>, VaultError> {
        let backend = &*self.shared.backend;
        let master_key = route.unlocked.master_key();
        let entry = route.entry(backend, "write")?;
        let blob = entry.file_blob();

        if status.offset % CHUNK_PLAINTEXT_SIZE as u64 != 0 {
            return Err(VaultError::interop(
                format!(
                    "resume offset {} is not a multiple of the {CHUNK_PLAINTEXT_SIZE} byte chunk size",
                    status.offset
                ),
                route.context("write"),
            ));
        }
        let start_chunk = status.offset / CHUNK_PLAINTEXT_SIZE as u64;

        if entry.is_shortened() && backend.find(&entry.dir_id_file())? {
            return Err(VaultError::interop(
                "a directory exists at this path",
                route.context("write").with_encrypted_path(&entry.entry),
            ));
        }
        if let Some(name_file) = entry.name_file() {
            write_all(
                backend,
                &name_file,
                entry.name.full_name().as_bytes(),
                &TransferStatus::new(),
            )?;
        }

        let file_context = FileContext::new()
            .with_path(route.path.clone())
            .with_dir_id(&entry.parent_dir_id);
        let header = match (&status.header, start_chunk) {
            (Some(header), _) => header.clone(),
            (None, 0) => FileHeader::create(),
            (None, _) => {
                let mut existing = backend.read(&blob, 0)?;
                read_header(&mut *existing, master_key, &file_context)?
            }
        };

        let mode = status.nonce_mode.unwrap_or_else(|| route.unlocked.nonce_mode());
        let nonces = nonce_generator(mode, &header, status, route)?;

        let mut backend_status = TransferStatus {
            length: None,
            offset: 0,
            create_new: status.create_new,
            metadata: status.metadata.clone(),
            header: None,
            nonce_mode: None,
        };
        if start_chunk > 0 {
            backend_status.offset = chunk_to_encrypted_offset(start_chunk);
        }
        if let Some(length) = status.length {
            let total = ciphertext_size(status.offset + length);
            let skipped = if start_chunk > 0 { backend_status.offset } else { 0 };
            backend_status.length = Some(total - skipped);
        }

        let stream = backend.write(&blob, &backend_status)?;
        let stream_context = StreamingContext::new()
            .with_path(route.path.clone())
            .with_operation("write");
        debug!(encrypted = %blob, start_chunk, ?mode, "Opened encrypted upload");
        let writer = if start_chunk == 0 {
            EncryptingWriter::new(stream, &header, master_key, nonces, stream_context)?
        } else {
            EncryptingWriter::resume(stream, &header, start_chunk, nonces, stream_context)
        };
        Ok(Box::new(writer))
    }

    /// Current plaintext size of a file, for resuming uploads.
    pub fn append(&self, path: &RemotePath) -> Result<Append, VaultError> {
        match self.shared.route(path)? {
            Route::Plain(path) => Ok(self.shared.backend.append(&path)?),
            Route::Vault(route) => {
                let backend = &*self.shared.backend;
                let blob = route.entry(backend, "append")?.file_blob();
                let stored = backend.append(&blob)?;
                let size = plaintext_size(stored.size).ok_or_else(|| {
                    VaultError::InvalidCiphertextSize {
                        size: stored.size,
                        context: route.context("append").with_encrypted_path(&blob),
                    }
                })?;
                Ok(Append { size })
            }
        }
    }

    /// SHA-256 over the bytes a `write` of `reader` with `status` stores.
    ///
    /// Inside a vault this is the ciphertext, which is only reproducible with
    /// a preset header and rotating nonces; anything else is refused.
    #[instrument(level = "debug", skip(self, reader, status), fields(path = %path))]
    pub fn checksum(
        &self,
        path: &RemotePath,
        reader: &mut dyn Read,
        status: &TransferStatus,
    ) -> Result<String, VaultError> {
        let mut sink = DigestSink::new();
        match self.shared.route(path)? {
            Route::Plain(_) => {
                io::copy(reader, &mut sink).map_err(VaultError::from_io)?;
            }
            Route::Vault(route) => {
                let header = status.header.as_ref().ok_or_else(|| {
                    VaultError::interop(
                        "checksum needs a preset file header",
                        route.context("checksum"),
                    )
                })?;
                let mode = status.nonce_mode.unwrap_or_else(|| route.unlocked.nonce_mode());
                if mode != NonceMode::Rotating || status.offset != 0 {
                    return Err(VaultError::interop(
                        "checksum needs rotating nonces and a write from offset 0",
                        route.context("checksum"),
                    ));
                }
                let nonces = nonce_generator(mode, header, status, &route)?;
                let mut writer = EncryptingWriter::new(
                    &mut sink,
                    header,
                    route.unlocked.master_key(),
                    nonces,
                    StreamingContext::new()
                        .with_path(route.path.clone())
                        .with_operation("checksum"),
                )?;
                io::copy(reader, &mut writer).map_err(VaultError::from_io)?;
                writer.finish()?;
            }
        }
        Ok(hex::encode(sink.finish()))
    }
}

fn nonce_generator(
    mode: NonceMode,
    header: &FileHeader,
    status: &TransferStatus,
    route: &VaultRoute,
) -> Result<Box<dyn NonceGenerator>, VaultError> {
    match mode {
        NonceMode::Random => Ok(Box::new(RandomNonceGenerator)),
        NonceMode::Rotating => {
            let length = status.length.ok_or_else(|| {
                VaultError::interop(
                    "rotating nonces need the plaintext length up front",
                    route.context("write"),
                )
            })?;
            let chunks = number_of_chunks(status.offset + length);
            Ok(Box::new(header.rotating_nonces(chunks)))
        }
    }
}

/// Hashes everything written to it.
struct DigestSink {
    context: digest::Context,
}

impl DigestSink {
    fn new() -> Self {
        Self {
            context: digest::Context::new(&digest::SHA256),
        }
    }

    fn finish(self) -> Vec<u8> {
        self.context.finish().as_ref().to_vec()
    }
}

impl Write for DigestSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.context.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
