//! Entry names: AES-SIV over the NFC form of a cleartext name, with the parent
//! directory id as associated data, then base64url and a `.c9r` suffix.
//!
//! Because SIV is deterministic a cleartext path maps to exactly one storage
//! path, and because the directory id is bound in, a name copied into another
//! directory no longer decrypts. Names longer than the shortening threshold
//! are replaced by a `.c9s` directory holding the full name in `name.c9s`.

use std::fmt;
use std::sync::Arc;

use aes_siv::{KeyInit, siv::Aes256Siv};
use base64::{Engine as _, engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD}};
use data_encoding::BASE32;
use ring::digest::{SHA1_FOR_LEGACY_USE_ONLY, digest};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

use crate::crypto::keys::{KeyAccessError, MasterKey};
use crate::vault::path::DirId;

pub const C9R_EXTENSION: &str = ".c9r";
pub const C9S_EXTENSION: &str = ".c9s";
/// File inside a `.c9s` directory that stores the full `.c9r` name.
pub const NAME_FILE: &str = "name.c9s";
pub const DEFAULT_SHORTENING_THRESHOLD: usize = 220;
/// Every deflated name is 28 base64 characters of SHA-1 plus `.c9s`.
pub const SHORTENED_NAME_LENGTH: usize = 32;

/// The name being processed when a [`NameError`] was raised.
#[derive(Debug, Clone, Default)]
pub struct NameContext {
    pub cleartext: Option<String>,
    pub ciphertext: Option<String>,
    pub dir_id: Option<DirId>,
}

impl NameContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_encrypted_name(self, name: impl Into<String>) -> Self {
        Self { ciphertext: Some(name.into()), ..self }
    }

    #[must_use]
    pub fn with_cleartext_name(self, name: impl Into<String>) -> Self {
        Self { cleartext: Some(name.into()), ..self }
    }

    #[must_use]
    pub fn with_dir_id(self, dir_id: &DirId) -> Self {
        Self { dir_id: Some(dir_id.clone()), ..self }
    }
}

impl fmt::Display for NameContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.cleartext, &self.ciphertext) {
            (Some(clear), _) => write!(f, "'{clear}'")?,
            (None, Some(cipher)) if cipher.len() > 40 => write!(f, "'{}…'", &cipher[..40])?,
            (None, Some(cipher)) => write!(f, "'{cipher}'")?,
            (None, None) => write!(f, "<unknown name>")?,
        }
        if let Some(dir_id) = &self.dir_id {
            write!(f, " in {dir_id}")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum NameError {
    /// SIV tag mismatch: altered name, foreign key or an entry moved from another directory.
    #[error("name {context} failed authentication")]
    DecryptionFailed { context: NameContext },

    #[error("name {context} is not base64url: {reason}")]
    Base64Decode { reason: String, context: NameContext },

    #[error("name {context} decrypted to invalid UTF-8: {reason}")]
    Utf8Decode { reason: String, context: NameContext },

    /// Metadata files and foreign objects that carry no `.c9r` suffix.
    #[error("{context} is not an encrypted entry")]
    NotEncrypted { context: NameContext },

    /// Only the content of the entry's `name.c9s` can be decrypted.
    #[error("{context} is deflated, decrypt the content of its {NAME_FILE} instead")]
    ShortenedName { context: NameContext },

    /// Empty, `.`, `..` or containing `/`.
    #[error("{context} cannot be used as an entry name")]
    InvalidName { context: NameContext },

    /// The threshold is below even the deflated name length.
    #[error("entry name for {context} needs {length} bytes, limit is {limit}")]
    NameTooLong {
        length: usize,
        limit: usize,
        context: NameContext,
    },

    #[error("AES-SIV refused to seal {context}")]
    EncryptionFailed { context: NameContext },

    #[error("could not hash directory id {dir_id}")]
    DirIdHashFailed { dir_id: String },

    #[error(transparent)]
    KeyAccess(#[from] KeyAccessError),
}

/// Storage entry chosen for one cleartext name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptedName {
    /// `<base64>.c9r`, stored as is.
    Regular(String),
    /// `<sha1>.c9s`, a directory whose `name.c9s` holds `full`.
    Shortened { deflated: String, full: String },
}

impl EncryptedName {
    /// What the backend listing shows.
    pub fn entry_name(&self) -> &str {
        match self {
            Self::Regular(name) | Self::Shortened { deflated: name, .. } => name,
        }
    }

    /// What gets decrypted.
    pub fn full_name(&self) -> &str {
        match self {
            Self::Regular(name) | Self::Shortened { full: name, .. } => name,
        }
    }

    pub fn is_shortened(&self) -> bool {
        matches!(self, Self::Shortened { .. })
    }
}

/// `base64url(SHA1(full)) + ".c9s"`.
fn deflate(full: &str) -> String {
    let hash = digest(&SHA1_FOR_LEGACY_USE_ONLY, full.as_bytes());
    URL_SAFE.encode(hash) + C9S_EXTENSION
}

fn is_valid_cleartext(name: &str) -> bool {
    !matches!(name, "" | "." | "..") && !name.contains('/')
}

/// Encrypts and decrypts entry names for one vault. Holds nothing but a
/// shared key and the threshold, so clones are cheap and thread-safe.
#[derive(Clone)]
pub struct FilenameCodec {
    master_key: Arc<MasterKey>,
    shortening_threshold: usize,
}

impl fmt::Debug for FilenameCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilenameCodec")
            .field("shortening_threshold", &self.shortening_threshold)
            .finish_non_exhaustive()
    }
}

impl FilenameCodec {
    pub fn new(master_key: Arc<MasterKey>, shortening_threshold: usize) -> Self {
        Self {
            master_key,
            shortening_threshold,
        }
    }

    pub fn shortening_threshold(&self) -> usize {
        self.shortening_threshold
    }

    fn siv<R>(&self, f: impl FnOnce(&mut Aes256Siv) -> R) -> Result<R, KeyAccessError> {
        self.master_key.with_siv_key(|key| f(&mut Aes256Siv::new(key)))
    }

    /// `BASE32(SHA1(SIV(dir_id)))`: 32 characters, split as `d/AB/CDE…` in storage.
    pub fn hash_dir_id(&self, dir_id: &DirId) -> Result<String, NameError> {
        let no_aad: [&[u8]; 0] = [];
        let sealed = self
            .siv(|siv| siv.encrypt(no_aad, dir_id.as_bytes()))?
            .map_err(|_| NameError::DirIdHashFailed {
                dir_id: dir_id.to_string(),
            })?;
        Ok(BASE32.encode(digest(&SHA1_FOR_LEGACY_USE_ONLY, &sealed).as_ref()))
    }

    /// The full `.c9r` name of `name` inside `dir_id`, before shortening.
    fn seal(&self, dir_id: &DirId, name: &str) -> Result<String, NameError> {
        let nfc: String = name.nfc().collect();
        let sealed = self
            .siv(|siv| siv.encrypt([dir_id.as_bytes()], nfc.as_bytes()))?
            .map_err(|_| NameError::EncryptionFailed {
                context: NameContext::new().with_cleartext_name(name).with_dir_id(dir_id),
            })?;
        Ok(URL_SAFE.encode(sealed) + C9R_EXTENSION)
    }

    /// Seals `name` for `dir_id`, deflating it to `.c9s` when the `.c9r`
    /// form is longer than the threshold.
    pub fn encrypt_name(&self, dir_id: &DirId, name: &str) -> Result<EncryptedName, NameError> {
        let context = || NameContext::new().with_cleartext_name(name).with_dir_id(dir_id);
        if !is_valid_cleartext(name) {
            return Err(NameError::InvalidName { context: context() });
        }

        let full = self.seal(dir_id, name)?;
        if full.len() <= self.shortening_threshold {
            return Ok(EncryptedName::Regular(full));
        }
        if SHORTENED_NAME_LENGTH > self.shortening_threshold {
            return Err(NameError::NameTooLong {
                length: SHORTENED_NAME_LENGTH,
                limit: self.shortening_threshold,
                context: context(),
            });
        }
        Ok(EncryptedName::Shortened {
            deflated: deflate(&full),
            full,
        })
    }

    /// Opens a full `.c9r` name. Deflated `.c9s` names are refused; the
    /// caller reads their `name.c9s` and passes that instead. Unpadded
    /// base64 is tolerated.
    pub fn decrypt_name(&self, dir_id: &DirId, encrypted_name: &str) -> Result<String, NameError> {
        let context = || NameContext::new().with_encrypted_name(encrypted_name).with_dir_id(dir_id);
        if encrypted_name.ends_with(C9S_EXTENSION) {
            return Err(NameError::ShortenedName { context: context() });
        }
        let Some(stem) = encrypted_name.strip_suffix(C9R_EXTENSION) else {
            return Err(NameError::NotEncrypted { context: context() });
        };

        let sealed = URL_SAFE
            .decode(stem)
            .or_else(|_| URL_SAFE_NO_PAD.decode(stem))
            .map_err(|e| NameError::Base64Decode {
                reason: e.to_string(),
                context: context(),
            })?;
        let plain = self
            .siv(|siv| siv.decrypt([dir_id.as_bytes()], &sealed))?
            .map_err(|_| NameError::DecryptionFailed { context: context() })?;
        String::from_utf8(plain).map_err(|e| NameError::Utf8Decode {
            reason: e.to_string(),
            context: context(),
        })
    }
}
