//! Streaming encryption and decryption over `std::io`.
//!
//! [`EncryptingWriter`] turns plaintext written to it into header + chunks on
//! an inner writer; [`DecryptingReader`] does the reverse and can start at any
//! chunk. Neither ever holds more than one chunk in memory.

use std::fmt;
use std::io::{self, Read, Write};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::crypto::keys::MasterKey;
use crate::crypto::nonce::NonceGenerator;
use crate::fs::chunk::{CHUNK_ENCRYPTED_SIZE, CHUNK_PLAINTEXT_SIZE, ChunkCipher, HEADER_SIZE};
use crate::fs::file::{
    FileContext, FileDecryptionError, FileEncryptionError, FileHeader, decrypt_file_header,
    encrypt_file_header,
};
use crate::vault::path::RemotePath;

/// Context for streaming operations.
#[derive(Debug, Clone, Default)]
pub struct StreamingContext {
    /// Ciphertext path on the backend
    pub path: Option<RemotePath>,
    /// Chunk being processed
    pub chunk_number: Option<u64>,
    /// Operation being performed
    pub operation: Option<&'static str>,
}

impl StreamingContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_path(mut self, path: RemotePath) -> Self {
        self.path = Some(path);
        self
    }

    #[must_use]
    pub fn with_chunk(mut self, chunk_number: u64) -> Self {
        self.chunk_number = Some(chunk_number);
        self
    }

    #[must_use]
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        self.operation = Some(operation);
        self
    }
}

impl fmt::Display for StreamingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(op) = self.operation {
            parts.push(op.to_string());
        }
        if let Some(ref path) = self.path {
            parts.push(format!("at {path}"));
        }
        if let Some(chunk) = self.chunk_number {
            parts.push(format!("chunk {chunk}"));
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Errors that can occur during streaming operations.
#[derive(Error, Debug)]
pub enum StreamingError {
    /// IO error on the underlying stream
    #[error("IO error during {context}: {source}")]
    Io {
        #[source]
        source: io::Error,
        context: StreamingContext,
    },

    /// **[INTEGRITY VIOLATION]** Header or chunk failed to decrypt.
    #[error(transparent)]
    Decryption(#[from] FileDecryptionError),

    #[error(transparent)]
    Encryption(#[from] FileEncryptionError),

    /// **[PROGRAMMING ERROR]** Writer used after `finish`.
    #[error("Writer already finished for {context}")]
    AlreadyFinished { context: StreamingContext },
}

impl StreamingError {
    pub fn io_with_context(source: io::Error, context: StreamingContext) -> Self {
        StreamingError::Io { source, context }
    }
}

impl From<StreamingError> for io::Error {
    fn from(err: StreamingError) -> Self {
        match err {
            StreamingError::Io { source, .. } => source,
            other => io::Error::other(other),
        }
    }
}

/// Read and decrypt the fixed-size header at the start of `reader`.
pub fn read_header<R: Read + ?Sized>(
    reader: &mut R,
    master_key: &MasterKey,
    context: &FileContext,
) -> Result<FileHeader, StreamingError> {
    let mut bytes = [0u8; HEADER_SIZE];
    let got = read_full(reader, &mut bytes).map_err(|e| {
        StreamingError::io_with_context(e, StreamingContext::new().with_operation("read header"))
    })?;
    if got < HEADER_SIZE {
        warn!(actual = got, "Ciphertext shorter than file header");
        return Err(FileDecryptionError::InvalidHeader {
            reason: format!("expected {HEADER_SIZE} bytes, got {got}"),
            context: context.clone(),
        }
        .into());
    }
    Ok(decrypt_file_header(&bytes, master_key, context)?)
}

/// Fill `buf` as far as the reader allows, returning how many bytes were read.
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Encrypts plaintext into chunks on an inner writer.
///
/// Each full 32 KiB of plaintext is sealed and written as soon as it is
/// buffered; the final partial chunk goes out on [`finish`](Self::finish).
/// A file of zero bytes is a header with no chunks.
///
/// Dropping the writer without calling `finish` loses the buffered tail and
/// logs a warning.
pub struct EncryptingWriter<W: Write> {
    inner: Option<W>,
    cipher: ChunkCipher,
    nonces: Box<dyn NonceGenerator>,
    buffer: Vec<u8>,
    next_chunk: u64,
    plaintext_written: u64,
    context: StreamingContext,
}

impl<W: Write> EncryptingWriter<W> {
    /// Start a new file: writes the encrypted header immediately.
    pub fn new(
        mut inner: W,
        header: &FileHeader,
        master_key: &MasterKey,
        nonces: Box<dyn NonceGenerator>,
        context: StreamingContext,
    ) -> Result<Self, StreamingError> {
        let sealed = encrypt_file_header(header, master_key)?;
        inner
            .write_all(&sealed)
            .map_err(|e| StreamingError::io_with_context(e, context.clone()))?;
        debug!(context = %context, "Wrote file header");
        Ok(Self::resume(inner, header, 0, nonces, context))
    }

    /// Continue an existing file at `start_chunk`; the inner writer must be
    /// positioned right after the last complete chunk.
    pub fn resume(
        inner: W,
        header: &FileHeader,
        start_chunk: u64,
        nonces: Box<dyn NonceGenerator>,
        context: StreamingContext,
    ) -> Self {
        Self {
            inner: Some(inner),
            cipher: ChunkCipher::new(header),
            nonces,
            buffer: Vec::with_capacity(CHUNK_PLAINTEXT_SIZE),
            next_chunk: start_chunk,
            plaintext_written: 0,
            context,
        }
    }

    /// Plaintext bytes accepted so far by this writer.
    pub fn plaintext_written(&self) -> u64 {
        self.plaintext_written
    }

    fn flush_chunk(&mut self) -> Result<(), StreamingError> {
        let index = self.next_chunk;
        let nonce = self
            .nonces
            .nonce_for(index)
            .map_err(|source| FileEncryptionError::Nonce {
                source,
                context: FileContext::new().with_chunk(index),
            })?;
        let sealed = self.cipher.encrypt_chunk(&self.buffer, index, &nonce)?;
        let inner = self.inner.as_mut().ok_or_else(|| StreamingError::AlreadyFinished {
            context: self.context.clone(),
        })?;
        inner.write_all(&sealed).map_err(|e| {
            StreamingError::io_with_context(e, self.context.clone().with_chunk(index))
        })?;
        trace!(chunk = index, plaintext = self.buffer.len(), "Flushed chunk");
        self.buffer.clear();
        self.next_chunk += 1;
        Ok(())
    }

    /// Seal the final partial chunk and hand back the inner writer.
    pub fn finish(mut self) -> Result<W, StreamingError> {
        if self.inner.is_none() {
            return Err(StreamingError::AlreadyFinished {
                context: self.context.clone(),
            });
        }
        if !self.buffer.is_empty() {
            self.flush_chunk()?;
        }
        let mut inner = self.inner.take().ok_or_else(|| StreamingError::AlreadyFinished {
            context: self.context.clone(),
        })?;
        inner
            .flush()
            .map_err(|e| StreamingError::io_with_context(e, self.context.clone()))?;
        debug!(
            context = %self.context,
            chunks = self.next_chunk,
            plaintext = self.plaintext_written,
            "Finished encrypted stream"
        );
        Ok(inner)
    }
}

impl<W: Write> Write for EncryptingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.inner.is_none() {
            return Err(StreamingError::AlreadyFinished {
                context: self.context.clone(),
            }
            .into());
        }
        let mut rest = buf;
        while !rest.is_empty() {
            let room = CHUNK_PLAINTEXT_SIZE - self.buffer.len();
            let take = room.min(rest.len());
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.buffer.len() == CHUNK_PLAINTEXT_SIZE {
                self.flush_chunk()?;
            }
        }
        self.plaintext_written += buf.len() as u64;
        Ok(buf.len())
    }

    /// Flushes the inner writer only; a partial chunk stays buffered so chunk
    /// boundaries never depend on flush timing.
    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

impl<W: Write> Drop for EncryptingWriter<W> {
    fn drop(&mut self) {
        if self.inner.is_some() {
            warn!(
                context = %self.context,
                buffered = self.buffer.len(),
                "EncryptingWriter dropped without finish(), upload abandoned"
            );
        }
    }
}

/// Decrypts a chunk stream from an inner reader.
///
/// The inner reader must be positioned at the start of `start_chunk`
/// (right after the header for chunk 0). `skip` leading plaintext bytes of
/// that first chunk are discarded, which is how ranged reads land on an
/// arbitrary offset.
pub struct DecryptingReader<R: Read> {
    inner: R,
    cipher: ChunkCipher,
    context: FileContext,
    next_chunk: u64,
    skip: usize,
    ciphertext: Vec<u8>,
    plaintext: Vec<u8>,
    position: usize,
    eof: bool,
}

impl<R: Read> DecryptingReader<R> {
    pub fn new(
        inner: R,
        header: &FileHeader,
        start_chunk: u64,
        skip: usize,
        context: FileContext,
    ) -> Self {
        Self {
            inner,
            cipher: ChunkCipher::new(header),
            context,
            next_chunk: start_chunk,
            skip,
            ciphertext: vec![0u8; CHUNK_ENCRYPTED_SIZE],
            plaintext: Vec::new(),
            position: 0,
            eof: false,
        }
    }

    fn fill(&mut self) -> Result<(), StreamingError> {
        let got = read_full(&mut self.inner, &mut self.ciphertext).map_err(|e| {
            StreamingError::io_with_context(
                e,
                StreamingContext::new()
                    .with_operation("read chunk")
                    .with_chunk(self.next_chunk),
            )
        })?;
        // Format 8 has no end marker, so a blob cut at a chunk boundary
        // ends here like a shorter file.
        if got == 0 {
            self.eof = true;
            self.plaintext.clear();
            self.position = 0;
            return Ok(());
        }

        let index = self.next_chunk;
        self.plaintext = self
            .cipher
            .decrypt_chunk(&self.ciphertext[..got], index, &self.context)?;
        self.next_chunk += 1;
        self.position = self.skip.min(self.plaintext.len());
        self.skip = 0;
        trace!(chunk = index, size = self.plaintext.len(), "Decrypted chunk");
        Ok(())
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.position >= self.plaintext.len() {
            if self.eof {
                return Ok(0);
            }
            self.fill()?;
        }
        let available = &self.plaintext[self.position..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n;
        Ok(n)
    }
}
