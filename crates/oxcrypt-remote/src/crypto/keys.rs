use std::sync::RwLock;

use generic_array::{GenericArray, typenum::U64};
use memsafe::MemSafe;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

/// The protected key pages could not be reached.
#[derive(Debug, Error)]
pub enum KeyAccessError {
    /// mlock, mprotect or munlock refused.
    #[error("protected key memory is unavailable: {0}")]
    MemoryProtection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Another thread panicked while it held a key half.
    #[error("key lock poisoned by a panicking thread")]
    LockPoisoned,
}

impl KeyAccessError {
    pub fn memory_protection<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        Self::MemoryProtection(Box::new(err))
    }
}

/// The vault configuration token did not check out against this key.
#[derive(Debug, Error)]
pub enum JwtValidationError {
    #[error(transparent)]
    KeyAccess(#[from] KeyAccessError),

    #[error("vault configuration token rejected: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),
}

type ProtectedHalf = RwLock<MemSafe<[u8; 32]>>;

fn protect(bytes: [u8; 32]) -> Result<ProtectedHalf, KeyAccessError> {
    MemSafe::new(bytes)
        .map(RwLock::new)
        .map_err(KeyAccessError::memory_protection)
}

/// Opens one half for the duration of `f`. `MemSafe::read` changes page
/// protection, so even readers need the write side of the lock.
fn expose<R>(half: &ProtectedHalf, f: impl FnOnce(&[u8; 32]) -> R) -> Result<R, KeyAccessError> {
    let mut slot = half.write().map_err(|_| KeyAccessError::LockPoisoned)?;
    let bytes = slot.read().map_err(KeyAccessError::memory_protection)?;
    Ok(f(&bytes))
}

fn concat(first: &ProtectedHalf, second: &ProtectedHalf) -> Result<Zeroizing<[u8; 64]>, KeyAccessError> {
    let mut out = Zeroizing::new([0u8; 64]);
    expose(first, |k| out[..32].copy_from_slice(k))?;
    expose(second, |k| out[32..].copy_from_slice(k))?;
    Ok(out)
}

/// Encryption key and MAC key of one unlocked vault, 32 bytes each.
///
/// The bytes sit in mlocked pages that are inaccessible between calls and wiped
/// on drop. Callers borrow them through the `with_*` methods; any combined copy
/// those methods build is zeroized before they return.
#[derive(Debug)]
pub struct MasterKey {
    enc: ProtectedHalf,
    mac: ProtectedHalf,
}

// SAFETY: `MemSafe` stores a raw pointer to its pages, which opts out of the
// auto traits. The pointer is only dereferenced inside `expose`, under the
// write lock of its half, so moving or sharing the key across threads is sound.
unsafe impl Send for MasterKey {}
unsafe impl Sync for MasterKey {}

impl MasterKey {
    /// Draws both halves from the thread rng.
    pub fn random() -> Result<Self, KeyAccessError> {
        let mut enc = Zeroizing::new([0u8; 32]);
        let mut mac = Zeroizing::new([0u8; 32]);
        let mut rng = rand::rng();
        rng.fill_bytes(&mut enc[..]);
        rng.fill_bytes(&mut mac[..]);
        Self::new(*enc, *mac)
    }

    /// Moves raw halves into protected memory. Wiping the caller's copies is
    /// the caller's job.
    pub fn new(aes_key: [u8; 32], mac_key: [u8; 32]) -> Result<Self, KeyAccessError> {
        Ok(Self {
            enc: protect(aes_key)?,
            mac: protect(mac_key)?,
        })
    }

    pub fn with_aes_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8; 32]) -> R,
    {
        expose(&self.enc, f)
    }

    pub fn with_mac_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8; 32]) -> R,
    {
        expose(&self.mac, f)
    }

    /// Both halves as `enc ‖ mac`, the HS256 secret of `vault.cryptomator`.
    pub fn with_raw_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8]) -> R,
    {
        let key = concat(&self.enc, &self.mac)?;
        Ok(f(key.as_slice()))
    }

    /// Both halves as `mac ‖ enc`, the key layout AES-SIV expects.
    ///
    /// ```
    /// # use oxcrypt_remote::crypto::MasterKey;
    /// # use aes_siv::{siv::Aes256Siv, KeyInit};
    /// let master_key = MasterKey::random().unwrap();
    /// let mut siv = master_key.with_siv_key(|key| Aes256Siv::new(key)).unwrap();
    /// let sealed = siv.encrypt(&[b"dir-id"], b"notes.txt").unwrap();
    /// assert_eq!(sealed.len(), 16 + 9);
    /// ```
    pub fn with_siv_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&GenericArray<u8, U64>) -> R,
    {
        let key = concat(&self.mac, &self.enc)?;
        Ok(f(GenericArray::from_slice(key.as_slice())))
    }

    /// HS256 signer for the configuration token. `jsonwebtoken` copies the
    /// secret into memory it never wipes, so keep the result short-lived.
    pub fn create_jwt_encoding_key(&self) -> Result<jsonwebtoken::EncodingKey, KeyAccessError> {
        self.with_raw_key(jsonwebtoken::EncodingKey::from_secret)
    }

    /// Checks the token signature with [`Self::with_raw_key`] and returns its claims.
    pub fn validate_jwt<T>(
        &self,
        token: &str,
        validation: &jsonwebtoken::Validation,
    ) -> Result<T, JwtValidationError>
    where
        T: serde::de::DeserializeOwned,
    {
        let decoded = self.with_raw_key(|secret| {
            let key = jsonwebtoken::DecodingKey::from_secret(secret);
            jsonwebtoken::decode::<T>(token, &key, validation)
        })?;
        Ok(decoded?.claims)
    }
}
