#![forbid(unsafe_code)]

//! Vault configuration: the signed `vault.cryptomator` token and the
//! caller-side [`VaultOptions`].

use std::env;

use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::crypto::keys::{JwtValidationError, KeyAccessError, MasterKey};
use crate::crypto::nonce::{NonceError, NonceMode};
use crate::fs::name::DEFAULT_SHORTENING_THRESHOLD;
use crate::vault::master_key::DEFAULT_MASTERKEY_FILENAME;

/// File name of the signed configuration inside the vault root.
pub const VAULT_CONFIG_FILENAME: &str = "vault.cryptomator";

/// The only vault format this crate reads and writes.
pub const VAULT_FORMAT: i32 = 8;

/// Cipher combination written to new vaults and the only one accepted.
pub const CIPHER_COMBO_SIV_GCM: &str = "SIV_GCM";

const KID_SCHEME: &str = "masterkeyfile";

const ENV_FAST_KDF: &str = "OXCRYPT_FAST_KDF";
const ENV_NONCE_MODE: &str = "OXCRYPT_NONCE_MODE";

/// Claims contained in the vault configuration JWT.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VaultConfigurationClaims {
    format: i32,
    #[serde(default = "default_shortening_threshold")]
    shortening_threshold: i32,
    jti: String,
    cipher_combo: String,
}

fn default_shortening_threshold() -> i32 {
    DEFAULT_SHORTENING_THRESHOLD as i32
}

impl VaultConfigurationClaims {
    /// Claims for a brand-new vault.
    pub fn new(shortening_threshold: usize) -> Self {
        Self {
            format: VAULT_FORMAT,
            shortening_threshold: i32::try_from(shortening_threshold).unwrap_or(i32::MAX),
            jti: uuid::Uuid::new_v4().to_string(),
            cipher_combo: CIPHER_COMBO_SIV_GCM.to_string(),
        }
    }

    pub fn format(&self) -> i32 {
        self.format
    }

    pub fn jti(&self) -> &str {
        &self.jti
    }

    pub fn cipher_combo(&self) -> &str {
        &self.cipher_combo
    }

    /// Encrypted names longer than this are shortened to `.c9s` form.
    pub fn shortening_threshold(&self) -> usize {
        usize::try_from(self.shortening_threshold.max(0)).unwrap_or(DEFAULT_SHORTENING_THRESHOLD)
    }
}

/// Errors reading or writing `vault.cryptomator`.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// **[INTEGRITY VIOLATION]** Signature check failed or the token is malformed.
    #[error("Vault configuration signature invalid: {0}")]
    JwtValidation(#[from] JwtValidationError),

    #[error("Vault configuration is not a valid JWT: {0}")]
    JwtDecode(#[from] jsonwebtoken::errors::Error),

    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),

    /// **[INTEROPERABILITY]** Written by a client speaking another format.
    #[error("Unsupported vault format {0}, expected {VAULT_FORMAT}")]
    UnsupportedVaultFormat(i32),

    /// **[INTEROPERABILITY]** Content cipher this crate does not implement.
    #[error("Unsupported cipher combo '{0}'")]
    UnsupportedCipherCombo(String),

    #[error("Missing kid in vault configuration header")]
    MissingKid,

    #[error("Invalid master key reference '{0}'")]
    InvalidKid(String),
}

impl ConfigError {
    /// True when the token is well-formed but describes a vault we cannot serve.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            ConfigError::UnsupportedVaultFormat(_) | ConfigError::UnsupportedCipherCombo(_)
        )
    }
}

/// Sign `claims` into a `vault.cryptomator` token referencing `masterkey_filename`.
pub fn create_vault_config(
    claims: &VaultConfigurationClaims,
    master_key: &MasterKey,
    masterkey_filename: &str,
) -> Result<String, ConfigError> {
    let encoding_key = master_key.create_jwt_encoding_key()?;
    let mut header = jsonwebtoken::Header::new(Algorithm::HS256);
    header.kid = Some(format!("{KID_SCHEME}:{masterkey_filename}"));
    Ok(jsonwebtoken::encode(&header, claims, &encoding_key)?)
}

/// Name of the key file a configuration token points at, read from its
/// unverified `kid` header.
pub fn masterkey_filename_from_config(token: &str) -> Result<String, ConfigError> {
    let header = jsonwebtoken::decode_header(token)?;
    let kid = header.kid.ok_or(ConfigError::MissingKid)?;
    let uri = Url::parse(&kid).map_err(|_| ConfigError::InvalidKid(kid.clone()))?;
    if uri.scheme() != KID_SCHEME {
        return Err(ConfigError::InvalidKid(kid));
    }
    let name = uri.path().trim_start_matches('/');
    if name.is_empty() || name.split('/').any(|s| s == "..") {
        return Err(ConfigError::InvalidKid(kid));
    }
    Ok(name.to_string())
}

/// Verify the token's signature with `master_key` and check it describes a
/// vault this crate can serve.
pub fn validate_vault_claims(
    token: &str,
    master_key: &MasterKey,
) -> Result<VaultConfigurationClaims, ConfigError> {
    let header = jsonwebtoken::decode_header(token)?;

    let mut validation = Validation::new(header.alg);
    validation.required_spec_claims.clear();
    validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

    let claims = master_key.validate_jwt::<VaultConfigurationClaims>(token, &validation)?;

    if claims.format != VAULT_FORMAT {
        warn!(format = claims.format, "Unsupported vault format");
        return Err(ConfigError::UnsupportedVaultFormat(claims.format));
    }
    if claims.cipher_combo != CIPHER_COMBO_SIV_GCM {
        warn!(cipher_combo = %claims.cipher_combo, "Unsupported cipher combo");
        return Err(ConfigError::UnsupportedCipherCombo(claims.cipher_combo));
    }
    debug!(threshold = claims.shortening_threshold, "Vault configuration verified");
    Ok(claims)
}

/// Caller-side options for creating and unlocking vaults.
///
/// Deserializable from JSON with camelCase keys; every field is optional.
///
/// ```
/// use oxcrypt_remote::vault::config::VaultOptions;
/// use oxcrypt_remote::crypto::NonceMode;
///
/// let options: VaultOptions =
///     serde_json::from_str(r#"{"shorteningThreshold": 180, "nonceMode": "rotating"}"#).unwrap();
/// assert_eq!(options.shortening_threshold, 180);
/// assert_eq!(options.nonce_mode, NonceMode::Rotating);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct VaultOptions {
    /// Threshold for new vaults, and for vaults lacking `vault.cryptomator`.
    pub shortening_threshold: usize,
    /// Default nonce policy for file writes.
    pub nonce_mode: NonceMode,
    /// Extra secret mixed into key derivation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pepper: Vec<u8>,
    pub masterkey_filename: String,
    /// Cheap scrypt for new key files. Tests only.
    pub fast_kdf: bool,
}

impl Default for VaultOptions {
    fn default() -> Self {
        Self {
            shortening_threshold: DEFAULT_SHORTENING_THRESHOLD,
            nonce_mode: NonceMode::default(),
            pepper: Vec::new(),
            masterkey_filename: DEFAULT_MASTERKEY_FILENAME.to_string(),
            fast_kdf: false,
        }
    }
}

impl VaultOptions {
    /// Defaults overridden by `OXCRYPT_FAST_KDF` and `OXCRYPT_NONCE_MODE`.
    pub fn from_env() -> Result<Self, NonceError> {
        Self::default().with_overrides(
            env::var(ENV_FAST_KDF).ok().as_deref(),
            env::var(ENV_NONCE_MODE).ok().as_deref(),
        )
    }

    fn with_overrides(
        mut self,
        fast_kdf: Option<&str>,
        nonce_mode: Option<&str>,
    ) -> Result<Self, NonceError> {
        if let Some(value) = fast_kdf {
            self.fast_kdf = value == "1" || value.eq_ignore_ascii_case("true");
        }
        if let Some(value) = nonce_mode {
            self.nonce_mode = value.parse()?;
        }
        Ok(self)
    }

    #[must_use]
    pub fn with_pepper(mut self, pepper: impl Into<Vec<u8>>) -> Self {
        self.pepper = pepper.into();
        self
    }

    #[must_use]
    pub fn with_shortening_threshold(mut self, threshold: usize) -> Self {
        self.shortening_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_nonce_mode(mut self, mode: NonceMode) -> Self {
        self.nonce_mode = mode;
        self
    }

    #[must_use]
    pub fn with_fast_kdf(mut self, fast: bool) -> Self {
        self.fast_kdf = fast;
        self
    }
}
