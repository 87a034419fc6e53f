#![forbid(unsafe_code)]

//! `masterkey.cryptomator`: both vault keys, RFC 3394 wrapped under a
//! key-encryption key that scrypt derives from the passphrase.
//!
//! Nothing here touches storage. Callers fetch and store the JSON through the
//! backend that hosts the vault.

use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use secrecy::SecretBox;
use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;
use thiserror::Error;
use tracing::{debug, instrument};
use unicode_normalization::UnicodeNormalization;
use zeroize::Zeroizing;

use crate::crypto::CryptoError;
use crate::crypto::key_wrap::{self, wrap_key};
use crate::crypto::keys::{KeyAccessError, MasterKey};

pub const DEFAULT_MASTERKEY_FILENAME: &str = "masterkey.cryptomator";

/// Format 8 pins the legacy `version` field to this value.
const KEY_FILE_VERSION: u32 = 999;

const SALT_LEN: usize = 8;
const BLOCK_SIZE: u32 = 8;
const PARALLELISM: u32 = 1;
const COST_LOG2: u8 = 15;
const FAST_COST_LOG2: u8 = 10;

type Kek = SecretBox<[u8; 32]>;

/// log2 of the scrypt cost N for newly written key files. `fast` drops N to
/// 1024 and must never be used for real vaults.
pub fn scrypt_cost_log2(fast: bool) -> u8 {
    if fast { FAST_COST_LOG2 } else { COST_LOG2 }
}

#[derive(Error, Debug)]
pub enum MasterKeyCreationError {
    #[error("no randomness for the scrypt salt: {0}")]
    Rng(String),

    #[error("unsupported scrypt parameters: {0}")]
    InvalidScryptParams(String),

    #[error("scrypt failed: {0}")]
    KeyDerivation(String),

    #[error("could not wrap a vault key: {0}")]
    KeyWrap(#[from] key_wrap::WrapError),

    #[error("could not encode the key file: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    KeyAccess(#[from] KeyAccessError),
}

#[derive(Error, Debug)]
pub enum ChangePassphraseError {
    #[error("key file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Usually the old passphrase was wrong.
    #[error("could not open the key file with the old passphrase: {0}")]
    Unlock(#[from] CryptoError),

    #[error("could not write the re-wrapped key file: {0}")]
    Create(#[from] MasterKeyCreationError),
}

/// scrypt inputs. The pepper, empty by default, is appended to the salt.
struct Kdf<'a> {
    salt: &'a [u8],
    pepper: &'a [u8],
    params: scrypt::Params,
}

impl<'a> Kdf<'a> {
    fn new(salt: &'a [u8], pepper: &'a [u8], log2_n: u8, r: u32) -> Result<Self, String> {
        let params = scrypt::Params::new(log2_n, r, PARALLELISM, 32)
            .map_err(|e| format!("N=2^{log2_n} r={r} p={PARALLELISM}: {e}"))?;
        Ok(Self { salt, pepper, params })
    }

    /// The passphrase is NFC-normalized first so composed and decomposed
    /// spellings unlock the same vault.
    fn derive(&self, passphrase: &str) -> Result<Kek, String> {
        let normalized = Zeroizing::new(passphrase.nfc().collect::<String>());
        let salted = Zeroizing::new([self.salt, self.pepper].concat());
        let mut kek = Zeroizing::new([0u8; 32]);
        scrypt::scrypt(normalized.as_bytes(), &salted, &self.params, &mut kek[..])
            .map_err(|e| e.to_string())?;
        Ok(SecretBox::new(Box::new(*kek)))
    }
}

fn sign_version(mac_key: &[u8; 32], version: u32) -> hmac::Tag {
    hmac::sign(&hmac::Key::new(hmac::HMAC_SHA256, mac_key), &version.to_be_bytes())
}

/// JSON layout of `masterkey.cryptomator`.
#[serde_as]
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterKeyFile {
    version: u32,

    #[serde_as(as = "Base64")]
    pub scrypt_salt: Vec<u8>,

    /// N, stored as the full power of two rather than its exponent.
    pub scrypt_cost_param: i32,

    pub scrypt_block_size: i32,

    /// Wrapped encryption key.
    #[serde_as(as = "Base64")]
    pub primary_master_key: Vec<u8>,

    #[serde_as(as = "Base64")]
    pub hmac_master_key: Vec<u8>,

    /// HMAC-SHA256 under the MAC key over the big-endian `version`.
    #[serde_as(as = "Base64")]
    pub version_mac: Vec<u8>,
}

impl MasterKeyFile {
    pub fn from_json(json: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(json)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    fn kdf<'a>(&'a self, pepper: &'a [u8]) -> Result<Kdf<'a>, CryptoError> {
        let log2_n = u32::try_from(self.scrypt_cost_param)
            .ok()
            .filter(|n| n.is_power_of_two())
            .and_then(|n| u8::try_from(n.trailing_zeros()).ok())
            .ok_or_else(|| {
                CryptoError::InvalidScryptParams(format!(
                    "cost {} is not a positive power of two",
                    self.scrypt_cost_param
                ))
            })?;
        let r = u32::try_from(self.scrypt_block_size).map_err(|_| {
            CryptoError::InvalidScryptParams(format!("block size {}", self.scrypt_block_size))
        })?;
        Kdf::new(&self.scrypt_salt, pepper, log2_n, r).map_err(CryptoError::InvalidScryptParams)
    }

    /// Runs scrypt with the parameters stored in this file.
    pub fn derive_key_with_pepper(&self, passphrase: &str, pepper: &[u8]) -> Result<Kek, CryptoError> {
        self.kdf(pepper)?
            .derive(passphrase)
            .map_err(CryptoError::KeyDerivationFailed)
    }

    pub fn unlock(&self, passphrase: &str) -> Result<MasterKey, CryptoError> {
        self.unlock_with_pepper(passphrase, &[])
    }

    /// A wrong passphrase or pepper surfaces as `KeyUnwrapIntegrityFailed`. A
    /// correct one over an edited `version` surfaces as `HmacVerificationFailed`.
    #[instrument(level = "debug", skip_all, fields(cost = self.scrypt_cost_param))]
    pub fn unlock_with_pepper(&self, passphrase: &str, pepper: &[u8]) -> Result<MasterKey, CryptoError> {
        let kek = self.derive_key_with_pepper(passphrase, pepper)?;
        let enc = unwrap_half(&self.primary_master_key, &kek)?;
        let mac = unwrap_half(&self.hmac_master_key, &kek)?;

        let expected = hmac::Key::new(hmac::HMAC_SHA256, &mac[..]);
        hmac::verify(&expected, &self.version.to_be_bytes(), &self.version_mac)
            .map_err(|_| CryptoError::HmacVerificationFailed)?;

        debug!(version = self.version, "key file opened");
        Ok(MasterKey::new(*enc, *mac)?)
    }
}

fn unwrap_half(wrapped: &[u8], kek: &Kek) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let plain = key_wrap::unwrap_key(wrapped, kek)?;
    let half: [u8; 32] = plain[..].try_into().map_err(|_| CryptoError::InvalidKeyLength {
        expected: 32,
        actual: plain.len(),
    })?;
    Ok(Zeroizing::new(half))
}

/// Produces the pretty-printed JSON for a fresh key file protecting
/// `master_key`: a random 8-byte salt, r = 8, p = 1 and N = 2^`cost_log2`.
pub fn create_masterkey_file(
    master_key: &MasterKey,
    passphrase: &str,
    pepper: &[u8],
    cost_log2: u8,
) -> Result<String, MasterKeyCreationError> {
    let mut salt = vec![0u8; SALT_LEN];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|e| MasterKeyCreationError::Rng(e.to_string()))?;

    let kek = Kdf::new(&salt, pepper, cost_log2, BLOCK_SIZE)
        .map_err(MasterKeyCreationError::InvalidScryptParams)?
        .derive(passphrase)
        .map_err(MasterKeyCreationError::KeyDerivation)?;

    let primary_master_key = master_key.with_aes_key(|k| wrap_key(k, &kek))??;
    let (hmac_master_key, version_mac) = master_key.with_mac_key(|k| {
        let tag = sign_version(k, KEY_FILE_VERSION);
        wrap_key(k, &kek).map(|wrapped| (wrapped, tag.as_ref().to_vec()))
    })??;

    let file = MasterKeyFile {
        version: KEY_FILE_VERSION,
        scrypt_salt: salt,
        scrypt_cost_param: 1i32 << cost_log2,
        scrypt_block_size: BLOCK_SIZE as i32,
        primary_master_key,
        hmac_master_key,
        version_mac,
    };
    debug!(cost_log2, "key file sealed");
    Ok(serde_json::to_string_pretty(&file)?)
}

/// Opens `masterkey_json` with the old passphrase and seals the same keys
/// under the new one. Vault contents stay valid because the keys themselves
/// are unchanged.
pub fn change_passphrase(
    masterkey_json: &[u8],
    old_passphrase: &str,
    new_passphrase: &str,
    pepper: &[u8],
    cost_log2: u8,
) -> Result<String, ChangePassphraseError> {
    let master_key = MasterKeyFile::from_json(masterkey_json)?.unlock_with_pepper(old_passphrase, pepper)?;
    Ok(create_masterkey_file(&master_key, new_passphrase, pepper, cost_log2)?)
}
