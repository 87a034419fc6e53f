//! Vault lifecycle, key files and path translation.

pub mod config;
pub mod crypto_vault;
pub mod dir_id;
pub mod master_key;
pub mod path;
pub mod registry;
pub mod translator;

pub use config::{VaultConfigurationClaims, VaultOptions};
pub use crypto_vault::{CryptoVault, UnlockedVault, VaultStatus};
pub use dir_id::DirectoryIdStore;
pub use master_key::MasterKeyFile;
pub use path::{DirId, RemotePath};
pub use registry::VaultRegistry;
pub use translator::{CiphertextEntry, ResolvedDirectory, VaultPathTranslator};
