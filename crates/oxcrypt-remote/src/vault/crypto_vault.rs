//! Vault lifecycle: creation, unlock and lock.
//!
//! A vault moves through `Locked → Unlocking → Unlocked → Locked`. Key
//! material exists only inside [`UnlockedVault`]; locking drops the vault's
//! reference and the keys are zeroed once in-flight operations release theirs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, instrument, warn};

use crate::backend::{Backend, BackendError, TransferStatus, read_all, write_all};
use crate::crypto::{MasterKey, NonceMode};
use crate::error::{VaultError, VaultOpContext};
use crate::fs::chunk;
use crate::fs::file::{DIR_ID_BACKUP_FILE, encrypt_dir_id_backup};
use crate::fs::name::FilenameCodec;
use crate::vault::config::{
    VAULT_CONFIG_FILENAME, VaultConfigurationClaims, VaultOptions, create_vault_config,
    masterkey_filename_from_config, validate_vault_claims,
};
use crate::vault::master_key::{
    ChangePassphraseError, MasterKeyFile, change_passphrase, create_masterkey_file,
    scrypt_cost_log2,
};
use crate::vault::path::{DirId, RemotePath};
use crate::vault::translator::VaultPathTranslator;

/// Observable lock state of a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultStatus {
    Locked,
    Unlocking,
    Unlocked,
}

enum VaultState {
    Locked,
    /// Carries the attempt number so a stale attempt cannot publish its keys.
    Unlocking(u64),
    Unlocked(Arc<UnlockedVault>),
}

enum UnlockStart {
    Attempt(u64),
    AlreadyUnlocked(Arc<UnlockedVault>),
}

/// Key material and translator of an unlocked vault.
pub struct UnlockedVault {
    root: RemotePath,
    master_key: Arc<MasterKey>,
    translator: VaultPathTranslator,
    nonce_mode: NonceMode,
    masterkey_filename: String,
    claims: Option<VaultConfigurationClaims>,
}

impl fmt::Debug for UnlockedVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockedVault")
            .field("root", &self.root)
            .field("nonce_mode", &self.nonce_mode)
            .field("masterkey_filename", &self.masterkey_filename)
            .field("master_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl UnlockedVault {
    fn new(
        root: RemotePath,
        master_key: MasterKey,
        shortening_threshold: usize,
        nonce_mode: NonceMode,
        masterkey_filename: String,
        claims: Option<VaultConfigurationClaims>,
    ) -> Self {
        let master_key = Arc::new(master_key);
        let codec = FilenameCodec::new(Arc::clone(&master_key), shortening_threshold);
        Self {
            translator: VaultPathTranslator::new(root.clone(), codec),
            root,
            master_key,
            nonce_mode,
            masterkey_filename,
            claims,
        }
    }

    pub fn root(&self) -> &RemotePath {
        &self.root
    }

    pub fn master_key(&self) -> &MasterKey {
        &self.master_key
    }

    pub fn translator(&self) -> &VaultPathTranslator {
        &self.translator
    }

    /// Default nonce policy for writes into this vault.
    pub fn nonce_mode(&self) -> NonceMode {
        self.nonce_mode
    }

    pub fn shortening_threshold(&self) -> usize {
        self.translator.codec().shortening_threshold()
    }

    pub fn masterkey_filename(&self) -> &str {
        &self.masterkey_filename
    }

    /// Verified configuration claims; `None` for vaults without `vault.cryptomator`.
    pub fn claims(&self) -> Option<&VaultConfigurationClaims> {
        self.claims.as_ref()
    }
}

/// One vault on a backend, rooted at a plaintext path.
pub struct CryptoVault {
    root: RemotePath,
    options: VaultOptions,
    state: RwLock<VaultState>,
    attempts: AtomicU64,
}

impl fmt::Debug for CryptoVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoVault")
            .field("root", &self.root)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl CryptoVault {
    /// A locked handle for an existing vault at `root`.
    pub fn open(root: RemotePath, options: VaultOptions) -> Self {
        Self {
            root,
            options,
            state: RwLock::new(VaultState::Locked),
            attempts: AtomicU64::new(0),
        }
    }

    /// Bootstrap a new vault at `root` and return it unlocked.
    ///
    /// Writes the master key file, the signed configuration and the root
    /// directory's id backup. An existing master key file is never replaced.
    #[instrument(level = "debug", skip(backend, passphrase, options), fields(root = %root))]
    pub fn create(
        backend: &dyn Backend,
        root: RemotePath,
        passphrase: &str,
        options: VaultOptions,
    ) -> Result<Self, VaultError> {
        let key_path = root.join(&options.masterkey_filename);
        if backend.find(&key_path)? {
            return Err(BackendError::AlreadyExists { path: key_path }.into());
        }

        let master_key = MasterKey::random()?;
        let key_file = create_masterkey_file(
            &master_key,
            passphrase,
            &options.pepper,
            scrypt_cost_log2(options.fast_kdf),
        )
        .map_err(|source| VaultError::MasterKeyCreation {
            root: root.clone(),
            source,
        })?;
        write_all(
            backend,
            &key_path,
            key_file.as_bytes(),
            &TransferStatus::new().exclusive(),
        )?;

        let claims = VaultConfigurationClaims::new(options.shortening_threshold);
        let token = create_vault_config(&claims, &master_key, &options.masterkey_filename)
            .map_err(|source| VaultError::Config {
                root: root.clone(),
                source,
            })?;
        write_all(
            backend,
            &root.join(VAULT_CONFIG_FILENAME),
            token.as_bytes(),
            &TransferStatus::new(),
        )?;

        let unlocked = UnlockedVault::new(
            root.clone(),
            master_key,
            options.shortening_threshold,
            options.nonce_mode,
            options.masterkey_filename.clone(),
            Some(claims),
        );
        let storage = unlocked.translator.root_directory()?.storage;
        let backup = encrypt_dir_id_backup(&DirId::root(), unlocked.master_key())?;
        write_all(
            backend,
            &storage.join(DIR_ID_BACKUP_FILE),
            &backup,
            &TransferStatus::new(),
        )?;

        info!(root = %root, "Created vault");
        Ok(Self {
            root,
            options,
            state: RwLock::new(VaultState::Unlocked(Arc::new(unlocked))),
            attempts: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &RemotePath {
        &self.root
    }

    pub fn options(&self) -> &VaultOptions {
        &self.options
    }

    pub fn status(&self) -> VaultStatus {
        match *self.state.read().unwrap_or_else(PoisonError::into_inner) {
            VaultState::Locked => VaultStatus::Locked,
            VaultState::Unlocking(_) => VaultStatus::Unlocking,
            VaultState::Unlocked(_) => VaultStatus::Unlocked,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.status() == VaultStatus::Unlocked
    }

    /// The unlocked key material, or an authentication error. Never touches
    /// the backend.
    pub fn unlocked(&self) -> Result<Arc<UnlockedVault>, VaultError> {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            VaultState::Unlocked(vault) => Ok(Arc::clone(vault)),
            VaultState::Locked => Err(VaultError::Locked {
                root: self.root.clone(),
            }),
            VaultState::Unlocking(_) => Err(VaultError::Unlocking {
                root: self.root.clone(),
            }),
        }
    }

    /// Unlock with a passphrase. Already-unlocked vaults are returned as is;
    /// any failure leaves the vault locked, and so does a [`lock`](Self::lock)
    /// issued while the keys were loading.
    #[instrument(level = "debug", skip(self, backend, passphrase), fields(root = %self.root))]
    pub fn unlock(
        &self,
        backend: &dyn Backend,
        passphrase: &str,
    ) -> Result<Arc<UnlockedVault>, VaultError> {
        let attempt = match self.begin_unlock()? {
            UnlockStart::Attempt(attempt) => attempt,
            UnlockStart::AlreadyUnlocked(vault) => return Ok(vault),
        };
        let result = self.load_keys(backend, passphrase).map(Arc::new);
        self.finish_unlock(attempt, result)
    }

    /// Moves `Locked` to `Unlocking` and returns the attempt number, or the
    /// vault that is already unlocked.
    fn begin_unlock(&self) -> Result<UnlockStart, VaultError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            VaultState::Unlocked(vault) => Ok(UnlockStart::AlreadyUnlocked(Arc::clone(vault))),
            VaultState::Unlocking(_) => Err(VaultError::Unlocking {
                root: self.root.clone(),
            }),
            VaultState::Locked => {
                let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
                *state = VaultState::Unlocking(attempt);
                Ok(UnlockStart::Attempt(attempt))
            }
        }
    }

    /// Publishes the outcome of `attempt`, unless the vault left that
    /// attempt's `Unlocking` state in the meantime. Then the keys are dropped.
    fn finish_unlock(
        &self,
        attempt: u64,
        result: Result<Arc<UnlockedVault>, VaultError>,
    ) -> Result<Arc<UnlockedVault>, VaultError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*state, VaultState::Unlocking(current) if current == attempt) {
            info!(root = %self.root, "Vault locked while unlocking, discarding keys");
            return Err(VaultError::Locked {
                root: self.root.clone(),
            });
        }
        match &result {
            Ok(vault) => {
                *state = VaultState::Unlocked(Arc::clone(vault));
                info!(root = %self.root, "Vault unlocked");
            }
            Err(e) => {
                *state = VaultState::Locked;
                warn!(root = %self.root, error = %e, "Vault unlock failed");
            }
        }
        result
    }

    fn load_keys(&self, backend: &dyn Backend, passphrase: &str) -> Result<UnlockedVault, VaultError> {
        let config_err = |source| VaultError::Config {
            root: self.root.clone(),
            source,
        };

        let token = match read_all(backend, &self.root.join(VAULT_CONFIG_FILENAME)) {
            Ok(bytes) => Some(String::from_utf8(bytes).map_err(|_| {
                VaultError::interop(
                    "vault configuration is not UTF-8",
                    VaultOpContext::new().with_path(&self.root),
                )
            })?),
            Err(e) if e.is_not_found() => {
                debug!("No vault configuration, using options");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let masterkey_filename = match &token {
            Some(token) => masterkey_filename_from_config(token.trim()).map_err(config_err)?,
            None => self.options.masterkey_filename.clone(),
        };

        let key_path = self.root.join(&masterkey_filename);
        let key_bytes = match read_all(backend, &key_path) {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                return Err(VaultError::not_found(
                    VaultOpContext::new()
                        .with_operation("unlock")
                        .with_path(&self.root)
                        .with_encrypted_path(&key_path),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        let key_file =
            MasterKeyFile::from_json(&key_bytes).map_err(|source| VaultError::MasterKeyFormat {
                root: self.root.clone(),
                source,
            })?;
        let master_key = key_file
            .unlock_with_pepper(passphrase, &self.options.pepper)
            .map_err(|source| VaultError::Unlock {
                root: self.root.clone(),
                source,
            })?;

        let claims = token
            .as_deref()
            .map(|t| validate_vault_claims(t.trim(), &master_key))
            .transpose()
            .map_err(config_err)?;
        let threshold = claims
            .as_ref()
            .map_or(self.options.shortening_threshold, |c| c.shortening_threshold());

        Ok(UnlockedVault::new(
            self.root.clone(),
            master_key,
            threshold,
            self.options.nonce_mode,
            masterkey_filename,
            claims,
        ))
    }

    /// Discard the key material.
    pub fn lock(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, VaultState::Unlocked(_)) {
            info!(root = %self.root, "Vault locked");
        }
        *state = VaultState::Locked;
    }

    /// Chunks a file of `plaintext_size` bytes occupies, for sizing rotating
    /// nonce generators up front.
    pub fn number_of_chunks(&self, plaintext_size: u64) -> u64 {
        chunk::number_of_chunks(plaintext_size)
    }

    /// Re-wrap the master key under a new passphrase. The vault must be
    /// unlocked; content and names are untouched.
    #[instrument(level = "debug", skip_all, fields(root = %self.root))]
    pub fn change_passphrase(
        &self,
        backend: &dyn Backend,
        old_passphrase: &str,
        new_passphrase: &str,
    ) -> Result<(), VaultError> {
        let vault = self.unlocked()?;
        let key_path = self.root.join(vault.masterkey_filename());
        let current = read_all(backend, &key_path)?;
        let updated = change_passphrase(
            &current,
            old_passphrase,
            new_passphrase,
            &self.options.pepper,
            scrypt_cost_log2(self.options.fast_kdf),
        )
        .map_err(|e| match e {
            ChangePassphraseError::Parse(source) => VaultError::MasterKeyFormat {
                root: self.root.clone(),
                source,
            },
            ChangePassphraseError::Unlock(source) => VaultError::Unlock {
                root: self.root.clone(),
                source,
            },
            ChangePassphraseError::Create(source) => VaultError::MasterKeyCreation {
                root: self.root.clone(),
                source,
            },
        })?;
        write_all(backend, &key_path, updated.as_bytes(), &TransferStatus::new())?;
        info!("Passphrase changed");
        Ok(())
    }
}
