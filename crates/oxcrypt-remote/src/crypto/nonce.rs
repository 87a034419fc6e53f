//! Chunk nonce policies.
//!
//! Random nonces are the default. Rotating nonces derive every chunk nonce from
//! the file's content key, its header nonce and the chunk index, so encrypting
//! the same plaintext twice under the same header yields identical ciphertext.
//! Uploads that must know their ciphertext up front (precomputed checksums,
//! multipart object stores) rely on that.

use rand::RngCore;
use ring::hmac;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fs::chunk::NONCE_SIZE;

const ROTATING_NONCE_LABEL: &[u8] = b"chunk-nonce";

/// Which nonce policy writers use for file content chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonceMode {
    #[default]
    Random,
    Rotating,
}

impl std::str::FromStr for NonceMode {
    type Err = NonceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(NonceMode::Random),
            "rotating" => Ok(NonceMode::Rotating),
            other => Err(NonceError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NonceError {
    /// **[PROGRAMMING ERROR]** More chunks were written than the length announced up front.
    #[error("Rotating nonce generator exhausted: chunk {requested} requested, {available} precomputed")]
    Exhausted { requested: u64, available: u64 },

    #[error("Unknown nonce mode '{0}'")]
    UnknownMode(String),
}

/// Source of per-chunk nonces for one file.
pub trait NonceGenerator: Send {
    fn nonce_for(&mut self, chunk_index: u64) -> Result<[u8; NONCE_SIZE], NonceError>;
}

/// Fresh random nonce for every chunk.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomNonceGenerator;

impl NonceGenerator for RandomNonceGenerator {
    fn nonce_for(&mut self, _chunk_index: u64) -> Result<[u8; NONCE_SIZE], NonceError> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);
        Ok(nonce)
    }
}

/// Deterministic nonces bound to a file header, valid for a fixed number of chunks.
pub struct RotatingNonceGenerator {
    key: hmac::Key,
    header_nonce: [u8; NONCE_SIZE],
    chunk_count: u64,
}

impl RotatingNonceGenerator {
    pub fn new(content_key: &[u8; 32], header_nonce: &[u8; NONCE_SIZE], chunk_count: u64) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, content_key),
            header_nonce: *header_nonce,
            chunk_count,
        }
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }
}

impl std::fmt::Debug for RotatingNonceGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingNonceGenerator")
            .field("chunk_count", &self.chunk_count)
            .finish_non_exhaustive()
    }
}

impl NonceGenerator for RotatingNonceGenerator {
    fn nonce_for(&mut self, chunk_index: u64) -> Result<[u8; NONCE_SIZE], NonceError> {
        if chunk_index >= self.chunk_count {
            return Err(NonceError::Exhausted {
                requested: chunk_index,
                available: self.chunk_count,
            });
        }
        let mut ctx = hmac::Context::with_key(&self.key);
        ctx.update(ROTATING_NONCE_LABEL);
        ctx.update(&self.header_nonce);
        ctx.update(&chunk_index.to_be_bytes());
        let tag = ctx.sign();

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&tag.as_ref()[..NONCE_SIZE]);
        Ok(nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotating_nonces_are_deterministic_and_distinct() {
        let mut a = RotatingNonceGenerator::new(&[3u8; 32], &[5u8; NONCE_SIZE], 4);
        let mut b = RotatingNonceGenerator::new(&[3u8; 32], &[5u8; NONCE_SIZE], 4);

        let first: Vec<_> = (0..4).map(|i| a.nonce_for(i).unwrap()).collect();
        let second: Vec<_> = (0..4).map(|i| b.nonce_for(i).unwrap()).collect();
        assert_eq!(first, second);

        for i in 0..first.len() {
            for j in (i + 1)..first.len() {
                assert_ne!(first[i], first[j]);
            }
        }
    }

    #[test]
    fn rotating_nonces_depend_on_header() {
        let mut a = RotatingNonceGenerator::new(&[3u8; 32], &[5u8; NONCE_SIZE], 1);
        let mut b = RotatingNonceGenerator::new(&[3u8; 32], &[6u8; NONCE_SIZE], 1);
        assert_ne!(a.nonce_for(0).unwrap(), b.nonce_for(0).unwrap());
    }

    #[test]
    fn rotating_generator_refuses_extra_chunks() {
        let mut g = RotatingNonceGenerator::new(&[0u8; 32], &[0u8; NONCE_SIZE], 2);
        assert!(g.nonce_for(1).is_ok());
        assert_eq!(
            g.nonce_for(2),
            Err(NonceError::Exhausted { requested: 2, available: 2 })
        );
    }

    #[test]
    fn random_nonces_differ() {
        let mut g = RandomNonceGenerator;
        assert_ne!(g.nonce_for(0).unwrap(), g.nonce_for(0).unwrap());
    }

    #[test]
    fn nonce_mode_parses_case_insensitively() {
        assert_eq!("Rotating".parse::<NonceMode>().unwrap(), NonceMode::Rotating);
        assert_eq!("random".parse::<NonceMode>().unwrap(), NonceMode::Random);
        assert!("counter".parse::<NonceMode>().is_err());
    }
}
