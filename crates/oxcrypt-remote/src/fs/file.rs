//! The 68-byte file header and one-shot encryption of small blobs.
//!
//! A header is `nonce (12) ‖ AES-GCM(reserved 0xFF×8 ‖ content key) ‖ tag`
//! under the vault's encryption key. The chunk stream that follows is
//! produced by [`ChunkCipher`](crate::fs::chunk::ChunkCipher).

use std::{fmt, io};

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};
use zeroize::Zeroizing;

use crate::crypto::keys::{KeyAccessError, MasterKey};
use crate::crypto::nonce::{
    NonceError, NonceGenerator, RandomNonceGenerator, RotatingNonceGenerator,
};
use crate::fs::chunk::{
    CHUNK_ENCRYPTED_SIZE, CHUNK_OVERHEAD, CHUNK_PLAINTEXT_SIZE, ChunkCipher, HEADER_SIZE,
    NONCE_SIZE, TAG_SIZE, ciphertext_size,
};
use crate::vault::path::{DirId, RemotePath};

/// Encrypted copy of a directory's own id, kept next to its children.
pub const DIR_ID_BACKUP_FILE: &str = "dirid.c9r";

const RESERVED: [u8; 8] = [0xFF; 8];
const PAYLOAD_SIZE: usize = RESERVED.len() + 32;

const _: () = assert!(HEADER_SIZE == NONCE_SIZE + PAYLOAD_SIZE + TAG_SIZE);

/// Where a codec failure happened. Every field is optional; whatever the
/// caller knows ends up in the error message.
#[derive(Debug, Clone, Default)]
pub struct FileContext {
    pub name: Option<String>,
    /// Cleartext path as the caller addressed it.
    pub path: Option<RemotePath>,
    pub dir_id: Option<DirId>,
    pub chunk_number: Option<u64>,
}

impl FileContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_filename(self, name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), ..self }
    }

    #[must_use]
    pub fn with_path(self, path: RemotePath) -> Self {
        Self { path: Some(path), ..self }
    }

    #[must_use]
    pub fn with_dir_id(self, dir_id: &DirId) -> Self {
        Self { dir_id: Some(dir_id.clone()), ..self }
    }

    #[must_use]
    pub fn with_chunk(self, chunk_number: u64) -> Self {
        Self { chunk_number: Some(chunk_number), ..self }
    }
}

impl fmt::Display for FileContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.path, &self.name) {
            (Some(path), _) => write!(f, "{path}")?,
            (None, Some(name)) => write!(f, "{name}")?,
            (None, None) => write!(f, "<unnamed blob>")?,
        }
        if let Some(dir_id) = &self.dir_id {
            // The id is opaque; a prefix is enough to tell directories apart in logs.
            let id = dir_id.to_string();
            write!(f, " [dir {}]", id.get(..8).unwrap_or(&id))?;
        }
        if let Some(chunk) = self.chunk_number {
            write!(f, " chunk #{chunk}")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum FileDecryptionError {
    /// The header tag did not verify: wrong vault key or altered bytes.
    #[error("header of {context} failed authentication")]
    HeaderDecryption { context: FileContext },

    /// A chunk tag did not verify. Also raised for chunks moved to another index.
    #[error("content of {context} failed authentication")]
    ContentDecryption { context: FileContext },

    #[error("malformed header in {context}: {reason}")]
    InvalidHeader { reason: String, context: FileContext },

    /// Trailing bytes shorter than a chunk's nonce and tag, i.e. a truncated blob.
    #[error("{context} ends in a {actual_size}-byte fragment, a chunk needs at least {CHUNK_OVERHEAD}")]
    IncompleteChunk {
        context: FileContext,
        actual_size: usize,
    },

    #[error("reading {context}: {source}")]
    Io {
        #[source]
        source: io::Error,
        context: FileContext,
    },

    #[error(transparent)]
    KeyAccess(#[from] KeyAccessError),
}

impl FileDecryptionError {
    #[must_use]
    pub fn io_with_context(source: io::Error, context: FileContext) -> Self {
        Self::Io { source, context }
    }

    /// True when the ciphertext itself is bad, as opposed to I/O or key access.
    pub fn is_integrity_violation(&self) -> bool {
        !matches!(self, Self::Io { .. } | Self::KeyAccess(_))
    }
}

#[derive(Error, Debug)]
pub enum FileEncryptionError {
    #[error("sealing the header of {context}: {reason}")]
    HeaderEncryption { reason: String, context: FileContext },

    #[error("sealing content of {context}: {reason}")]
    ContentEncryption { reason: String, context: FileContext },

    #[error("no nonce for {context}: {source}")]
    Nonce {
        #[source]
        source: NonceError,
        context: FileContext,
    },

    #[error("writing {context}: {source}")]
    Io {
        #[source]
        source: io::Error,
        context: FileContext,
    },

    #[error(transparent)]
    KeyAccess(#[from] KeyAccessError),
}

impl FileEncryptionError {
    #[must_use]
    pub fn io_with_context(source: io::Error, context: FileContext) -> Self {
        Self::Io { source, context }
    }
}

/// Per-file secrets: the header nonce and the content key.
///
/// The header nonce is part of every chunk's associated data and seeds the
/// rotating nonce sequence. A resumed upload or a checksum pass clones the
/// header of the original write so both produce the same ciphertext.
#[derive(Clone)]
pub struct FileHeader {
    pub nonce: [u8; NONCE_SIZE],
    pub content_key: Zeroizing<[u8; 32]>,
}

impl fmt::Debug for FileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHeader")
            .field("nonce", &hex::encode(self.nonce))
            .field("content_key", &"[REDACTED]")
            .finish()
    }
}

impl FileHeader {
    pub fn create() -> Self {
        let mut header = Self {
            nonce: [0u8; NONCE_SIZE],
            content_key: Zeroizing::new([0u8; 32]),
        };
        let mut rng = rand::rng();
        rng.fill_bytes(&mut header.nonce);
        rng.fill_bytes(&mut header.content_key[..]);
        header
    }

    /// Nonces derived from the content key, for a file of `chunk_count` chunks.
    pub fn rotating_nonces(&self, chunk_count: u64) -> RotatingNonceGenerator {
        RotatingNonceGenerator::new(&self.content_key, &self.nonce, chunk_count)
    }
}

fn header_cipher<R>(master_key: &MasterKey, f: impl FnOnce(Aes256Gcm) -> R) -> Result<R, KeyAccessError> {
    master_key.with_aes_key(|k| f(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(k))))
}

#[instrument(level = "trace", skip_all)]
pub fn encrypt_file_header(
    header: &FileHeader,
    master_key: &MasterKey,
) -> Result<[u8; HEADER_SIZE], FileEncryptionError> {
    let mut payload = Zeroizing::new([0u8; PAYLOAD_SIZE]);
    let (reserved, key) = payload.split_at_mut(RESERVED.len());
    reserved.copy_from_slice(&RESERVED);
    key.copy_from_slice(&header.content_key[..]);

    let sealed = header_cipher(master_key, |gcm| {
        gcm.encrypt(Nonce::from_slice(&header.nonce), &payload[..])
    })?
    .map_err(|e| FileEncryptionError::HeaderEncryption {
        reason: e.to_string(),
        context: FileContext::new(),
    })?;

    let mut out = [0u8; HEADER_SIZE];
    let (nonce, body) = out.split_at_mut(NONCE_SIZE);
    nonce.copy_from_slice(&header.nonce);
    body.copy_from_slice(&sealed);
    trace!("header sealed");
    Ok(out)
}

#[instrument(level = "debug", skip(encrypted_header, master_key), fields(len = encrypted_header.len()))]
pub fn decrypt_file_header(
    encrypted_header: &[u8],
    master_key: &MasterKey,
    context: &FileContext,
) -> Result<FileHeader, FileDecryptionError> {
    let invalid = |reason: String| FileDecryptionError::InvalidHeader {
        reason,
        context: context.clone(),
    };
    if encrypted_header.len() != HEADER_SIZE {
        return Err(invalid(format!(
            "{} bytes instead of {HEADER_SIZE}",
            encrypted_header.len()
        )));
    }

    let (nonce_bytes, sealed) = encrypted_header.split_at(NONCE_SIZE);
    let payload = header_cipher(master_key, |gcm| gcm.decrypt(Nonce::from_slice(nonce_bytes), sealed))?
        .map(Zeroizing::new)
        .map_err(|_| {
            warn!(%context, "header tag mismatch");
            FileDecryptionError::HeaderDecryption {
                context: context.clone(),
            }
        })?;
    if payload.len() != PAYLOAD_SIZE {
        return Err(invalid(format!("payload of {} bytes", payload.len())));
    }

    let (reserved, key) = payload.split_at(RESERVED.len());
    // Other implementations ignore these bytes too, so a mismatch is logged only.
    if reserved != RESERVED {
        debug!(reserved = %hex::encode(reserved), "unexpected reserved header bytes");
    }

    let mut header = FileHeader {
        nonce: [0u8; NONCE_SIZE],
        content_key: Zeroizing::new([0u8; 32]),
    };
    header.nonce.copy_from_slice(nonce_bytes);
    header.content_key.copy_from_slice(key);
    Ok(header)
}

/// Header plus randomly-nonced chunks for an in-memory buffer. File content
/// is streamed instead; this serves small blobs like `dirid.c9r`.
pub fn encrypt_file(plaintext: &[u8], master_key: &MasterKey) -> Result<Vec<u8>, FileEncryptionError> {
    let header = FileHeader::create();
    let cipher = ChunkCipher::new(&header);
    let mut nonces = RandomNonceGenerator;

    let capacity = usize::try_from(ciphertext_size(plaintext.len() as u64)).unwrap_or(0);
    let mut out = Vec::with_capacity(capacity);
    out.extend_from_slice(&encrypt_file_header(&header, master_key)?);
    for (index, chunk) in (0u64..).zip(plaintext.chunks(CHUNK_PLAINTEXT_SIZE)) {
        let nonce = nonces.nonce_for(index).map_err(|source| FileEncryptionError::Nonce {
            source,
            context: FileContext::new().with_chunk(index),
        })?;
        out.extend(cipher.encrypt_chunk(chunk, index, &nonce)?);
    }
    Ok(out)
}

pub fn decrypt_file(
    encrypted: &[u8],
    master_key: &MasterKey,
    context: &FileContext,
) -> Result<Vec<u8>, FileDecryptionError> {
    let Some((head, body)) = encrypted.split_at_checked(HEADER_SIZE) else {
        return Err(FileDecryptionError::InvalidHeader {
            reason: format!("blob of {} bytes cannot hold a header", encrypted.len()),
            context: context.clone(),
        });
    };
    let cipher = ChunkCipher::new(&decrypt_file_header(head, master_key, context)?);

    let mut plaintext = Vec::with_capacity(body.len());
    for (index, chunk) in (0u64..).zip(body.chunks(CHUNK_ENCRYPTED_SIZE)) {
        plaintext.extend(cipher.decrypt_chunk(chunk, index, context)?);
    }
    Ok(plaintext)
}

pub fn encrypt_dir_id_backup(
    dir_id: &DirId,
    master_key: &MasterKey,
) -> Result<Vec<u8>, FileEncryptionError> {
    encrypt_file(dir_id.as_bytes(), master_key)
}

pub fn decrypt_dir_id_backup(
    encrypted: &[u8],
    master_key: &MasterKey,
) -> Result<DirId, FileDecryptionError> {
    let context = FileContext::new().with_filename(DIR_ID_BACKUP_FILE);
    let bytes = decrypt_file(encrypted, master_key, &context)?;
    match String::from_utf8(bytes) {
        Ok(id) => Ok(DirId::from_raw(id)),
        Err(_) => Err(FileDecryptionError::InvalidHeader {
            reason: "directory id is not UTF-8".to_string(),
            context,
        }),
    }
}
