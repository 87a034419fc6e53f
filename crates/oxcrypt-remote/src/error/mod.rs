//! Error types for the crate.
//!
//! Module-level errors carry their own context structs; [`VaultError`]
//! aggregates them for everything exposed on plaintext paths, and
//! [`VaultError::kind`] sorts any of them into the five-way [`ErrorKind`]
//! taxonomy callers branch on.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::backend::BackendError;
use crate::crypto::CryptoError;
use crate::crypto::keys::KeyAccessError;
use crate::vault::path::{DirId, RemotePath};

pub use crate::fs::file::{FileContext, FileDecryptionError, FileEncryptionError};
pub use crate::fs::name::{NameContext, NameError};
pub use crate::fs::streaming::{StreamingContext, StreamingError};
pub use crate::vault::config::ConfigError;
pub use crate::vault::master_key::{ChangePassphraseError, MasterKeyCreationError};

/// The coarse classification every error maps onto.
///
/// Integrity and Authentication mean wrong credentials or a damaged vault and
/// should be presented differently from NotFound and Backend, which are
/// ordinary storage conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Plaintext path, id file, header or ciphertext object missing.
    NotFound,
    /// Authentication failure on a header, chunk, name or signed config.
    Integrity,
    /// Vault locked, or unlock failed.
    Authentication,
    /// The backend or the stored data break an assumption of the format.
    Interoperability,
    /// Anything else the backend reported, passed through unchanged.
    Backend,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Interoperability => "interoperability",
            ErrorKind::Backend => "backend",
        };
        f.write_str(s)
    }
}

/// Context for vault operations, providing debugging information.
#[derive(Debug, Clone, Default)]
pub struct VaultOpContext {
    /// Plaintext path the caller asked for
    pub path: Option<RemotePath>,
    /// Ciphertext path on the backend
    pub encrypted_path: Option<RemotePath>,
    /// Directory id the operation ran in
    pub dir_id: Option<String>,
    /// Operation being performed
    pub operation: Option<&'static str>,
}

impl VaultOpContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_path(mut self, path: &RemotePath) -> Self {
        self.path = Some(path.clone());
        self
    }

    #[must_use]
    pub fn with_encrypted_path(mut self, path: &RemotePath) -> Self {
        self.encrypted_path = Some(path.clone());
        self
    }

    #[must_use]
    pub fn with_dir_id(mut self, dir_id: &DirId) -> Self {
        self.dir_id = Some(dir_id.as_str().to_string());
        self
    }

    #[must_use]
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        self.operation = Some(operation);
        self
    }
}

impl fmt::Display for VaultOpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(op) = self.operation {
            parts.push(op.to_string());
        }
        if let Some(ref path) = self.path {
            parts.push(format!("path '{path}'"));
        }
        if let Some(ref dir_id) = self.dir_id {
            let display_id = if dir_id.is_empty() {
                "<root>".to_string()
            } else if dir_id.len() > 12 {
                format!("{}...", &dir_id[..12])
            } else {
                dir_id.clone()
            };
            parts.push(format!("in directory {display_id}"));
        }
        if let Some(ref enc) = self.encrypted_path {
            parts.push(format!("at {enc}"));
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Not found: {context}")]
    NotFound { context: VaultOpContext },

    /// **[AUTHENTICATION]** Operation attempted while the vault is locked.
    #[error("Vault at {root} is locked")]
    Locked { root: RemotePath },

    /// **[AUTHENTICATION]** Another caller is unlocking this vault right now.
    #[error("Vault at {root} is being unlocked")]
    Unlocking { root: RemotePath },

    /// **[AUTHENTICATION]** Wrong passphrase or pepper, or a damaged key file.
    #[error("Failed to unlock vault at {root}: {source}")]
    Unlock {
        root: RemotePath,
        #[source]
        source: CryptoError,
    },

    #[error("Malformed master key file for vault at {root}: {source}")]
    MasterKeyFormat {
        root: RemotePath,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to create master key file for vault at {root}: {source}")]
    MasterKeyCreation {
        root: RemotePath,
        #[source]
        source: MasterKeyCreationError,
    },

    #[error("Vault configuration error for {root}: {source}")]
    Config {
        root: RemotePath,
        #[source]
        source: ConfigError,
    },

    #[error("Filename error for {context}: {source}")]
    Name {
        #[source]
        source: NameError,
        context: VaultOpContext,
    },

    #[error(transparent)]
    Decryption(#[from] FileDecryptionError),

    #[error(transparent)]
    Encryption(#[from] FileEncryptionError),

    #[error(transparent)]
    Streaming(#[from] StreamingError),

    /// **[INTEGRITY VIOLATION]** A `dir.c9r` holds something that is not a directory id.
    #[error("Invalid directory id for {context}: {reason}")]
    InvalidDirectoryId {
        reason: String,
        context: VaultOpContext,
    },

    /// **[INTEGRITY VIOLATION]** Ciphertext length no chunk layout can produce.
    #[error("Invalid ciphertext size {size} for {context}")]
    InvalidCiphertextSize { size: u64, context: VaultOpContext },

    /// The request cannot be expressed in the vault format or on this backend.
    #[error("Unsupported operation for {context}: {reason}")]
    Interoperability {
        reason: String,
        context: VaultOpContext,
    },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("IO error for {context}: {source}")]
    Io {
        #[source]
        source: io::Error,
        context: VaultOpContext,
    },

    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

impl VaultError {
    pub fn not_found(context: VaultOpContext) -> Self {
        VaultError::NotFound { context }
    }

    pub fn interop(reason: impl Into<String>, context: VaultOpContext) -> Self {
        VaultError::Interoperability {
            reason: reason.into(),
            context,
        }
    }

    pub fn name(source: NameError, context: VaultOpContext) -> Self {
        VaultError::Name { source, context }
    }

    /// Sort this error into the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::NotFound { .. } => ErrorKind::NotFound,
            VaultError::Locked { .. }
            | VaultError::Unlocking { .. }
            | VaultError::MasterKeyFormat { .. }
            | VaultError::MasterKeyCreation { .. }
            | VaultError::KeyAccess(_) => ErrorKind::Authentication,
            VaultError::Unlock { source, .. } => match source {
                CryptoError::HmacVerificationFailed => ErrorKind::Integrity,
                _ => ErrorKind::Authentication,
            },
            VaultError::Config { source, .. } => match source {
                ConfigError::JwtValidation(_) => ErrorKind::Integrity,
                ConfigError::KeyAccess(_) => ErrorKind::Authentication,
                _ => ErrorKind::Interoperability,
            },
            VaultError::Name { source, .. } => name_kind(source),
            VaultError::Decryption(e) => decryption_kind(e),
            VaultError::Encryption(e) => encryption_kind(e),
            VaultError::Streaming(e) => match e {
                StreamingError::Io { source, .. } => io_kind(source),
                StreamingError::Decryption(e) => decryption_kind(e),
                StreamingError::Encryption(e) => encryption_kind(e),
                StreamingError::AlreadyFinished { .. } => ErrorKind::Interoperability,
            },
            VaultError::InvalidDirectoryId { .. } | VaultError::InvalidCiphertextSize { .. } => {
                ErrorKind::Integrity
            }
            VaultError::Interoperability { .. } => ErrorKind::Interoperability,
            VaultError::Backend(e) => backend_kind(e),
            VaultError::Io { source, .. } => io_kind(source),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Recover the crate error carried inside an `io::Error` from a stream.
    ///
    /// Plain I/O errors from the backend stream come back as [`VaultError::Io`].
    pub fn from_io(err: io::Error) -> Self {
        let ours = err
            .get_ref()
            .is_some_and(|e| e.is::<VaultError>() || e.is::<StreamingError>());
        if !ours {
            return VaultError::Io {
                source: err,
                context: VaultOpContext::new(),
            };
        }

        let kind = err.kind();
        match err.into_inner() {
            Some(inner) => match inner.downcast::<VaultError>() {
                Ok(e) => *e,
                Err(inner) => match inner.downcast::<StreamingError>() {
                    Ok(e) => VaultError::Streaming(*e),
                    Err(inner) => VaultError::Io {
                        source: io::Error::new(kind, inner),
                        context: VaultOpContext::new(),
                    },
                },
            },
            None => VaultError::Io {
                source: io::Error::from(kind),
                context: VaultOpContext::new(),
            },
        }
    }
}

fn io_kind(err: &io::Error) -> ErrorKind {
    if err.kind() == io::ErrorKind::NotFound {
        ErrorKind::NotFound
    } else {
        ErrorKind::Backend
    }
}

fn backend_kind(err: &BackendError) -> ErrorKind {
    match err {
        BackendError::NotFound { .. } => ErrorKind::NotFound,
        _ => ErrorKind::Backend,
    }
}

fn name_kind(err: &NameError) -> ErrorKind {
    match err {
        NameError::DecryptionFailed { .. }
        | NameError::Base64Decode { .. }
        | NameError::Utf8Decode { .. } => ErrorKind::Integrity,
        NameError::KeyAccess(_) => ErrorKind::Authentication,
        _ => ErrorKind::Interoperability,
    }
}

fn decryption_kind(err: &FileDecryptionError) -> ErrorKind {
    match err {
        FileDecryptionError::Io { source, .. } => io_kind(source),
        FileDecryptionError::KeyAccess(_) => ErrorKind::Authentication,
        _ => ErrorKind::Integrity,
    }
}

fn encryption_kind(err: &FileEncryptionError) -> ErrorKind {
    match err {
        FileEncryptionError::Io { source, .. } => io_kind(source),
        FileEncryptionError::KeyAccess(_) => ErrorKind::Authentication,
        _ => ErrorKind::Interoperability,
    }
}

impl From<VaultError> for io::Error {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::Io { source, .. } => source,
            other => io::Error::other(other),
        }
    }
}

/// Lets a session stand in wherever a plain backend is expected.
impl From<VaultError> for BackendError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::Backend(e) => e,
            VaultError::NotFound { context } => BackendError::NotFound {
                path: context.path.unwrap_or_else(RemotePath::root),
            },
            other => BackendError::Other {
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }
}
