//! Cryptomator vaults on arbitrary storage backends.
//!
//! Mount vaults on a [`VaultSession`] and use it like a plain backend:
//! names and content under a vault root are encrypted on the way in and
//! decrypted on the way out, everything else passes through.
//!
//! ```
//! use std::sync::Arc;
//! use oxcrypt_remote::{MemoryBackend, RemotePath, VaultOptions, VaultSession};
//!
//! let session = VaultSession::new(Arc::new(MemoryBackend::new()));
//! let root = RemotePath::new("/vault");
//! session
//!     .create_vault(&root, "passphrase", VaultOptions::default().with_fast_kdf(true))
//!     .unwrap();
//!
//! session.write_bytes(&root.join("hello.txt"), b"hello world").unwrap();
//! assert_eq!(session.read_to_end(&root.join("hello.txt")).unwrap(), b"hello world");
//! ```

pub mod backend;
pub mod crypto;
pub mod error;
pub mod features;
pub mod fs;
pub mod session;
pub mod vault;

#[cfg(feature = "async")]
pub mod session_async;

// Re-export commonly used types at crate root
pub use backend::{Backend, BackendError, LocalBackend, MemoryBackend, TransferStatus};
pub use crypto::NonceMode;
pub use error::{ErrorKind, VaultError};
pub use features::{CollectingListener, ListListener};
pub use session::VaultSession;
pub use vault::{CryptoVault, RemotePath, VaultOptions, VaultRegistry, VaultStatus};

#[cfg(feature = "async")]
pub use session_async::AsyncVaultSession;
