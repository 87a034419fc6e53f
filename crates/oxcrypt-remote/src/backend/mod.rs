//! Capability traits a storage backend provides to the vault layer.
//!
//! Each capability is its own trait so a backend can be assembled from
//! independent pieces and decorators can wrap exactly what they intercept.
//! [`Backend`] bundles all of them for `Arc<dyn Backend>` use.
//!
//! Paths handed to a backend are opaque: inside a vault they are ciphertext
//! paths, outside one they are whatever the caller passed.

pub mod local;
pub mod memory;

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::time::SystemTime;

use thiserror::Error;

use crate::crypto::nonce::NonceMode;
use crate::fs::file::FileHeader;
use crate::vault::path::RemotePath;

pub use local::LocalBackend;
pub use memory::MemoryBackend;

/// Errors reported by a backend.
///
/// The vault layer passes these through unchanged; only `NotFound` and
/// `AlreadyExists` are ever inspected, to drive lookups and create races.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Not found: {path}")]
    NotFound { path: RemotePath },

    #[error("Already exists: {path}")]
    AlreadyExists { path: RemotePath },

    #[error("Directory not empty: {path}")]
    DirectoryNotEmpty { path: RemotePath },

    #[error("Operation '{operation}' not supported for {path}")]
    Unsupported {
        operation: &'static str,
        path: RemotePath,
    },

    #[error("IO error at {path}: {source}")]
    Io {
        #[source]
        source: io::Error,
        path: RemotePath,
    },

    #[error("{message}")]
    Other {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl BackendError {
    /// Map an `io::Error` onto the shared taxonomy.
    pub fn from_io(source: io::Error, path: &RemotePath) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => BackendError::NotFound { path: path.clone() },
            io::ErrorKind::AlreadyExists => BackendError::AlreadyExists { path: path.clone() },
            io::ErrorKind::DirectoryNotEmpty => {
                BackendError::DirectoryNotEmpty { path: path.clone() }
            }
            _ => BackendError::Io {
                source,
                path: path.clone(),
            },
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        BackendError::Other {
            message: message.into(),
            source: None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, BackendError::AlreadyExists { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Size and timestamps of a remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAttributes {
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
}

impl RemoteAttributes {
    pub fn file(size: u64) -> Self {
        Self {
            kind: EntryKind::File,
            size,
            modified: None,
            created: None,
        }
    }

    pub fn directory() -> Self {
        Self {
            kind: EntryKind::Directory,
            size: 0,
            modified: None,
            created: None,
        }
    }

    #[must_use]
    pub fn with_modified(mut self, modified: Option<SystemTime>) -> Self {
        self.modified = modified;
        self
    }

    #[must_use]
    pub fn with_created(mut self, created: Option<SystemTime>) -> Self {
        self.created = created;
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// One child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub attributes: RemoteAttributes,
}

/// Existing size of a file a write may continue from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Append {
    pub size: u64,
}

/// Parameters of a single write.
///
/// `length` and `offset` are in the caller's coordinates: plaintext bytes for
/// vault writes, raw bytes at the backend. `header` and `nonce_mode` only
/// matter to the encrypting layer and are ignored by backends.
#[derive(Debug, Clone, Default)]
pub struct TransferStatus {
    /// Total bytes the caller intends to write, if known up front.
    pub length: Option<u64>,
    /// Resume position; 0 writes a new object.
    pub offset: u64,
    /// Fail with `AlreadyExists` instead of replacing an existing object.
    pub create_new: bool,
    pub metadata: BTreeMap<String, String>,
    /// Reuse this file header instead of generating one.
    pub header: Option<FileHeader>,
    /// Override the vault's nonce policy for this write.
    pub nonce_mode: Option<NonceMode>,
}

impl TransferStatus {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.create_new = true;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, header: FileHeader) -> Self {
        self.header = Some(header);
        self
    }

    #[must_use]
    pub fn with_nonce_mode(mut self, mode: NonceMode) -> Self {
        self.nonce_mode = Some(mode);
        self
    }
}

/// Upload stream returned by a write.
///
/// Bytes become visible only after [`finish`](WriteStream::finish) succeeds.
/// Dropping the stream unfinished cancels the upload.
pub trait WriteStream: Write + Send {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

pub trait ListFeature: Send + Sync {
    /// Direct children of `directory`. `NotFound` if it does not exist.
    fn list(&self, directory: &RemotePath) -> Result<Vec<RemoteEntry>, BackendError>;
}

pub trait ReadFeature: Send + Sync {
    /// Stream the object's bytes starting at `offset`.
    fn read(&self, file: &RemotePath, offset: u64) -> Result<Box<dyn Read + Send>, BackendError>;
}

pub trait WriteFeature: Send + Sync {
    fn write(
        &self,
        file: &RemotePath,
        status: &TransferStatus,
    ) -> Result<Box<dyn WriteStream>, BackendError>;

    /// Current size of `file`, the offset a resumed write continues from.
    fn append(&self, file: &RemotePath) -> Result<Append, BackendError>;

    /// Whether `TransferStatus::create_new` is honoured atomically.
    fn supports_conditional_create(&self) -> bool {
        false
    }
}

pub trait DeleteFeature: Send + Sync {
    /// Delete a file or an empty directory.
    fn delete(&self, path: &RemotePath) -> Result<(), BackendError>;
}

pub trait MoveFeature: Send + Sync {
    /// Move a file or directory tree. Fails if `target` exists.
    fn rename(&self, source: &RemotePath, target: &RemotePath) -> Result<(), BackendError>;
}

pub trait DirectoryFeature: Send + Sync {
    fn mkdir(&self, directory: &RemotePath) -> Result<(), BackendError>;
}

pub trait TouchFeature: Send + Sync {
    /// Create an empty file, or leave an existing one untouched.
    fn touch(&self, file: &RemotePath) -> Result<(), BackendError>;
}

pub trait FindFeature: Send + Sync {
    fn find(&self, path: &RemotePath) -> Result<bool, BackendError>;
}

pub trait AttributesFeature: Send + Sync {
    fn attributes(&self, path: &RemotePath) -> Result<RemoteAttributes, BackendError>;
}

/// Every capability at once; implemented for anything that has them all.
pub trait Backend:
    ListFeature
    + ReadFeature
    + WriteFeature
    + DeleteFeature
    + MoveFeature
    + DirectoryFeature
    + TouchFeature
    + FindFeature
    + AttributesFeature
{
}

impl<T> Backend for T where
    T: ListFeature
        + ReadFeature
        + WriteFeature
        + DeleteFeature
        + MoveFeature
        + DirectoryFeature
        + TouchFeature
        + FindFeature
        + AttributesFeature
        + ?Sized
{
}

/// Read a whole (small) object into memory.
pub fn read_all(backend: &dyn Backend, file: &RemotePath) -> Result<Vec<u8>, BackendError> {
    let mut reader = backend.read(file, 0)?;
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .map_err(|e| BackendError::from_io(e, file))?;
    Ok(buf)
}

/// Write a whole (small) object and commit it.
pub fn write_all(
    backend: &dyn Backend,
    file: &RemotePath,
    data: &[u8],
    status: &TransferStatus,
) -> Result<(), BackendError> {
    let mut stream = backend.write(file, status)?;
    stream
        .write_all(data)
        .map_err(|e| BackendError::from_io(e, file))?;
    stream.finish().map_err(|e| BackendError::from_io(e, file))
}
