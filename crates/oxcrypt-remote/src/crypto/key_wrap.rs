//! AES key wrap ([RFC 3394](https://datatracker.ietf.org/doc/html/rfc3394)) with a 256-bit KEK.
//!
//! Used to seal the two master key halves inside `masterkey.cryptomator`.

use aes::Aes256;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use generic_array::GenericArray;
use secrecy::{ExposeSecret, SecretBox};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

/// Default initial value, RFC 3394 section 2.2.3.1.
const IV_3394: [u8; 8] = [0xa6; 8];

#[derive(Error, Debug)]
pub enum WrapError {
    #[error("The plaintext length is not a multiple of 64 bits per RFC3394.")]
    InvalidPlaintextLength,
}

#[derive(Error, Debug)]
pub enum UnwrapError {
    #[error("The ciphertext length is not a multiple of 64 bits per RFC3394.")]
    InvalidCiphertextLength,
    #[error("The ciphertext must hold at least two 64-bit blocks.")]
    CiphertextTooShort,
    #[error("The integrity check failed.")]
    InvalidIntegrityCheck,
}

fn cipher_for(kek: &SecretBox<[u8; 32]>) -> Aes256 {
    Aes256::new(GenericArray::from_slice(kek.expose_secret()))
}

/// Wrap `plaintext` (a multiple of 8 bytes) under `kek`.
pub fn wrap_key(plaintext: &[u8], kek: &SecretBox<[u8; 32]>) -> Result<Vec<u8>, WrapError> {
    if plaintext.is_empty() || plaintext.len() % 8 != 0 {
        return Err(WrapError::InvalidPlaintextLength);
    }

    let cipher = cipher_for(kek);
    let n = plaintext.len() / 8;
    let mut a = IV_3394;
    let mut registers = Zeroizing::new(plaintext.to_vec());
    let mut block = aes::Block::default();

    for j in 0..6 {
        for (i, r) in registers.chunks_mut(8).enumerate() {
            block[..8].copy_from_slice(&a);
            block[8..].copy_from_slice(r);
            cipher.encrypt_block(&mut block);

            let t = ((n * j) + i + 1) as u64;
            for (dst, (b, tb)) in a.iter_mut().zip(block[..8].iter().zip(t.to_be_bytes())) {
                *dst = b ^ tb;
            }
            r.copy_from_slice(&block[8..]);
        }
    }

    let mut ciphertext = Vec::with_capacity(8 + registers.len());
    ciphertext.extend_from_slice(&a);
    ciphertext.extend_from_slice(&registers);
    Ok(ciphertext)
}

/// Unwrap `ciphertext` under `kek`.
///
/// A wrong KEK surfaces as [`UnwrapError::InvalidIntegrityCheck`].
pub fn unwrap_key(
    ciphertext: &[u8],
    kek: &SecretBox<[u8; 32]>,
) -> Result<Zeroizing<Vec<u8>>, UnwrapError> {
    if ciphertext.len() % 8 != 0 {
        return Err(UnwrapError::InvalidCiphertextLength);
    }
    if ciphertext.len() < 16 {
        return Err(UnwrapError::CiphertextTooShort);
    }

    let cipher = cipher_for(kek);
    let n = ciphertext.len() / 8 - 1;
    let mut a = [0u8; 8];
    a.copy_from_slice(&ciphertext[..8]);
    let mut registers = Zeroizing::new(ciphertext[8..].to_vec());
    let mut block = aes::Block::default();

    for j in (0..6).rev() {
        for (i, r) in registers.chunks_mut(8).enumerate().rev() {
            let t = ((n * j) + i + 1) as u64;
            for (dst, (av, tb)) in block[..8].iter_mut().zip(a.iter().zip(t.to_be_bytes())) {
                *dst = av ^ tb;
            }
            block[8..].copy_from_slice(r);
            cipher.decrypt_block(&mut block);

            a.copy_from_slice(&block[..8]);
            r.copy_from_slice(&block[8..]);
        }
    }

    if a[..].ct_eq(&IV_3394[..]).into() {
        Ok(registers)
    } else {
        Err(UnwrapError::InvalidIntegrityCheck)
    }
}
