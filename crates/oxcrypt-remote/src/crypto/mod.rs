//! Master key handling plus the nonce and key-wrap primitives that sit under
//! the file and name codecs.

pub mod key_wrap;
pub mod keys;
pub mod nonce;

use thiserror::Error;

pub use keys::{KeyAccessError, MasterKey};
pub use nonce::{NonceError, NonceGenerator, NonceMode, RandomNonceGenerator, RotatingNonceGenerator};

/// Failures while turning a passphrase and `masterkey.cryptomator` into a
/// usable [`MasterKey`], or while sealing one back into that file.
///
/// A bad version MAC means the key file changed after it was written and is
/// reported as an integrity problem. A failed RFC 3394 unwrap is what a wrong
/// passphrase looks like, so it counts as an authentication failure.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The `versionMac` field does not match the unwrapped MAC key.
    #[error("master key file version MAC mismatch, the file was altered")]
    HmacVerificationFailed,

    /// The wrapped keys did not unwrap under the derived key-encryption key.
    #[error("could not unwrap the vault keys (wrong passphrase?)")]
    KeyUnwrapIntegrityFailed,

    #[error("scrypt failed: {0}")]
    KeyDerivationFailed(String),

    /// `scryptCostParam` or `scryptBlockSize` outside what scrypt accepts.
    #[error("unsupported scrypt parameters: {0}")]
    InvalidScryptParams(String),

    #[error("wrapped key has an impossible length")]
    InvalidCiphertextLength,

    #[error("expected a {expected}-byte key, found {actual} bytes")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error(transparent)]
    KeyAccess(#[from] KeyAccessError),
}

impl From<key_wrap::UnwrapError> for CryptoError {
    fn from(err: key_wrap::UnwrapError) -> Self {
        use key_wrap::UnwrapError;
        match err {
            UnwrapError::InvalidIntegrityCheck => Self::KeyUnwrapIntegrityFailed,
            UnwrapError::InvalidCiphertextLength | UnwrapError::CiphertextTooShort => {
                Self::InvalidCiphertextLength
            }
        }
    }
}
