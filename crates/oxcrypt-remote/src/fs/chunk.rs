//! Chunk wire format and plaintext/ciphertext size arithmetic.
//!
//! File content is cut into 32 KiB plaintext chunks. Each encrypted chunk is
//! `nonce (12) ‖ AES-GCM ciphertext ‖ tag (16)`, sealed with the file content
//! key and associated data `chunk index (u64 BE) ‖ header nonce`. Binding the
//! index into the AAD makes swapped or shifted chunks fail authentication.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use tracing::{trace, warn};

use crate::fs::file::{FileContext, FileDecryptionError, FileEncryptionError, FileHeader};

/// Encrypted header size: nonce (12) + encrypted payload (40) + tag (16).
pub const HEADER_SIZE: usize = 68;
/// Plaintext bytes per chunk.
pub const CHUNK_PLAINTEXT_SIZE: usize = 32 * 1024;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;
/// Bytes an encrypted chunk adds on top of its plaintext.
pub const CHUNK_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;
/// Size of a full encrypted chunk.
pub const CHUNK_ENCRYPTED_SIZE: usize = CHUNK_PLAINTEXT_SIZE + CHUNK_OVERHEAD;

const CHUNK_PLAINTEXT: u64 = CHUNK_PLAINTEXT_SIZE as u64;
const CHUNK_ENCRYPTED: u64 = CHUNK_ENCRYPTED_SIZE as u64;
const OVERHEAD: u64 = CHUNK_OVERHEAD as u64;
const HEADER: u64 = HEADER_SIZE as u64;

/// Chunk containing plaintext byte `offset`.
#[inline]
pub const fn plaintext_to_chunk_number(offset: u64) -> u64 {
    offset / CHUNK_PLAINTEXT
}

/// Position of plaintext byte `offset` inside its chunk.
#[inline]
pub const fn plaintext_to_chunk_offset(offset: u64) -> usize {
    (offset % CHUNK_PLAINTEXT) as usize
}

/// Ciphertext offset where chunk `chunk_number` begins.
#[inline]
pub const fn chunk_to_encrypted_offset(chunk_number: u64) -> u64 {
    HEADER + chunk_number * CHUNK_ENCRYPTED
}

/// Number of chunks an `n`-byte plaintext is split into. Empty files have none.
#[inline]
pub const fn number_of_chunks(plaintext_size: u64) -> u64 {
    plaintext_size.div_ceil(CHUNK_PLAINTEXT)
}

/// Ciphertext length of an `n`-byte plaintext, header included.
///
/// ```
/// use oxcrypt_remote::fs::chunk::{ciphertext_size, plaintext_size};
///
/// assert_eq!(ciphertext_size(0), 68);
/// assert_eq!(ciphertext_size(11), 68 + 11 + 28);
/// assert_eq!(plaintext_size(ciphertext_size(1_000_000)), Some(1_000_000));
/// ```
pub const fn ciphertext_size(plaintext_size: u64) -> u64 {
    let full = plaintext_size / CHUNK_PLAINTEXT;
    let rem = plaintext_size % CHUNK_PLAINTEXT;
    let tail = if rem > 0 { rem + OVERHEAD } else { 0 };
    HEADER + full * CHUNK_ENCRYPTED + tail
}

/// Plaintext length recovered from a ciphertext length.
///
/// `None` when the length cannot be produced by a valid file: shorter than the
/// header, or ending in a fragment too small to hold a chunk's nonce and tag.
/// A trailing chunk of exactly the overhead (an empty chunk) counts as zero bytes.
pub const fn plaintext_size(ciphertext_size: u64) -> Option<u64> {
    if ciphertext_size < HEADER {
        return None;
    }
    let body = ciphertext_size - HEADER;
    let full = body / CHUNK_ENCRYPTED;
    let rem = body % CHUNK_ENCRYPTED;
    if rem == 0 {
        Some(full * CHUNK_PLAINTEXT)
    } else if rem < OVERHEAD {
        None
    } else {
        Some(full * CHUNK_PLAINTEXT + rem - OVERHEAD)
    }
}

/// Per-file chunk cipher: AES-GCM keyed with the content key from a [`FileHeader`].
///
/// Holds no mutable state, so one instance may encrypt or decrypt any chunk of
/// its file in any order.
pub struct ChunkCipher {
    cipher: Aes256Gcm,
    header_nonce: [u8; NONCE_SIZE],
}

impl ChunkCipher {
    pub fn new(header: &FileHeader) -> Self {
        let key: &Key<Aes256Gcm> = (&*header.content_key).into();
        Self {
            cipher: Aes256Gcm::new(key),
            header_nonce: header.nonce,
        }
    }

    fn associated_data(&self, chunk_index: u64) -> [u8; 8 + NONCE_SIZE] {
        let mut aad = [0u8; 8 + NONCE_SIZE];
        aad[..8].copy_from_slice(&chunk_index.to_be_bytes());
        aad[8..].copy_from_slice(&self.header_nonce);
        aad
    }

    /// Seal one chunk of at most [`CHUNK_PLAINTEXT_SIZE`] bytes.
    pub fn encrypt_chunk(
        &self,
        plaintext: &[u8],
        chunk_index: u64,
        nonce: &[u8; NONCE_SIZE],
    ) -> Result<Vec<u8>, FileEncryptionError> {
        debug_assert!(plaintext.len() <= CHUNK_PLAINTEXT_SIZE);
        let aad = self.associated_data(chunk_index);
        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| FileEncryptionError::ContentEncryption {
                reason: e.to_string(),
                context: FileContext::new().with_chunk(chunk_index),
            })?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(nonce);
        out.extend_from_slice(&sealed);
        trace!(chunk = chunk_index, size = out.len(), "Encrypted chunk");
        Ok(out)
    }

    /// Open one encrypted chunk expected at position `chunk_index`.
    ///
    /// Fails with an integrity error if the chunk was modified, truncated, or
    /// belongs at a different index.
    pub fn decrypt_chunk(
        &self,
        ciphertext: &[u8],
        chunk_index: u64,
        context: &FileContext,
    ) -> Result<Vec<u8>, FileDecryptionError> {
        if ciphertext.len() < CHUNK_OVERHEAD || ciphertext.len() > CHUNK_ENCRYPTED_SIZE {
            warn!(
                chunk = chunk_index,
                actual_size = ciphertext.len(),
                "Chunk has impossible size"
            );
            return Err(FileDecryptionError::IncompleteChunk {
                context: context.clone().with_chunk(chunk_index),
                actual_size: ciphertext.len(),
            });
        }

        let aad = self.associated_data(chunk_index);
        self.cipher
            .decrypt(
                Nonce::from_slice(&ciphertext[..NONCE_SIZE]),
                Payload {
                    msg: &ciphertext[NONCE_SIZE..],
                    aad: &aad,
                },
            )
            .map_err(|_| {
                warn!(chunk = chunk_index, "Chunk authentication failed");
                FileDecryptionError::ContentDecryption {
                    context: context.clone().with_chunk(chunk_index),
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cipher() -> (FileHeader, ChunkCipher) {
        let header = FileHeader::create();
        let cipher = ChunkCipher::new(&header);
        (header, cipher)
    }

    #[test]
    fn test_constants() {
        assert_eq!(CHUNK_OVERHEAD, 28);
        assert_eq!(CHUNK_ENCRYPTED_SIZE, 32796);
    }

    #[test]
    fn test_chunk_math() {
        assert_eq!(plaintext_to_chunk_number(0), 0);
        assert_eq!(plaintext_to_chunk_number(32767), 0);
        assert_eq!(plaintext_to_chunk_number(32768), 1);
        assert_eq!(plaintext_to_chunk_offset(32769), 1);
        assert_eq!(chunk_to_encrypted_offset(0), 68);
        assert_eq!(chunk_to_encrypted_offset(2), 68 + 2 * 32796);
        assert_eq!(number_of_chunks(0), 0);
        assert_eq!(number_of_chunks(1), 1);
        assert_eq!(number_of_chunks(32768), 1);
        assert_eq!(number_of_chunks(32769), 2);
    }

    #[test]
    fn test_size_edges() {
        assert_eq!(ciphertext_size(0), 68);
        assert_eq!(ciphertext_size(32768), 68 + 32796);
        assert_eq!(ciphertext_size(32769), 68 + 32796 + 29);
        assert_eq!(plaintext_size(67), None);
        assert_eq!(plaintext_size(68), Some(0));
        // a lone empty chunk, as written by some clients for empty files
        assert_eq!(plaintext_size(68 + 28), Some(0));
        assert_eq!(plaintext_size(68 + 27), None);
        assert_eq!(plaintext_size(68 + 32796 + 10), None);
    }

    #[test]
    fn test_chunk_roundtrip() {
        let (_, cipher) = cipher();
        for len in [0, 1, CHUNK_PLAINTEXT_SIZE - 1, CHUNK_PLAINTEXT_SIZE] {
            let data = vec![0xA5; len];
            let sealed = cipher.encrypt_chunk(&data, 7, &[9u8; NONCE_SIZE]).unwrap();
            assert_eq!(sealed.len(), len + CHUNK_OVERHEAD);
            let opened = cipher.decrypt_chunk(&sealed, 7, &FileContext::new()).unwrap();
            assert_eq!(opened, data);
        }
    }

    #[test]
    fn test_wrong_index_fails() {
        let (_, cipher) = cipher();
        let sealed = cipher.encrypt_chunk(b"payload", 0, &[1u8; NONCE_SIZE]).unwrap();
        let err = cipher.decrypt_chunk(&sealed, 1, &FileContext::new()).unwrap_err();
        assert!(matches!(
            err,
            FileDecryptionError::ContentDecryption { ref context } if context.chunk_number == Some(1)
        ));
    }

    #[test]
    fn test_chunk_from_other_file_fails() {
        let (_, a) = cipher();
        let (_, b) = cipher();
        let sealed = a.encrypt_chunk(b"payload", 0, &[1u8; NONCE_SIZE]).unwrap();
        assert!(b.decrypt_chunk(&sealed, 0, &FileContext::new()).is_err());
    }

    #[test]
    fn test_every_byte_flip_detected() {
        let (_, cipher) = cipher();
        let sealed = cipher.encrypt_chunk(&[0x42; 64], 3, &[2u8; NONCE_SIZE]).unwrap();
        for i in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[i] ^= 0x80;
            let result = cipher.decrypt_chunk(&tampered, 3, &FileContext::new());
            assert!(
                matches!(result, Err(FileDecryptionError::ContentDecryption { .. })),
                "flip at byte {i} not detected"
            );
        }
    }

    #[test]
    fn test_truncated_chunk_is_incomplete() {
        let (_, cipher) = cipher();
        let result = cipher.decrypt_chunk(&[0u8; 20], 0, &FileContext::new());
        assert!(matches!(
            result,
            Err(FileDecryptionError::IncompleteChunk { actual_size: 20, .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(512))]

        #[test]
        fn size_conversion_roundtrips(n in 0u64..(1u64 << 40)) {
            prop_assert_eq!(plaintext_size(ciphertext_size(n)), Some(n));
        }

        #[test]
        fn ciphertext_size_strictly_increases(n in 0u64..(1u64 << 40)) {
            prop_assert!(ciphertext_size(n + 1) > ciphertext_size(n));
        }

        #[test]
        fn chunk_offsets_recompose(offset in 0u64..(1u64 << 40)) {
            let chunk = plaintext_to_chunk_number(offset);
            let within = plaintext_to_chunk_offset(offset) as u64;
            prop_assert_eq!(chunk * CHUNK_PLAINTEXT_SIZE as u64 + within, offset);
        }
    }
}
