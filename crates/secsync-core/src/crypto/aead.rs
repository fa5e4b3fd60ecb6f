//! XChaCha20-Poly1305 authenticated encryption.

use crate::{Result, SecsyncError};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::{CryptoRng, RngCore};

/// Symmetric key length in bytes.
pub const KEY_LENGTH: usize = 32;

/// XChaCha20 nonce length in bytes.
pub const NONCE_LENGTH: usize = 24;

/// Encrypt `plaintext` under `key` with a fresh random nonce, binding `aad`.
pub fn encrypt_aead<R: RngCore + CryptoRng>(
    plaintext: &[u8],
    aad: &[u8],
    key: &[u8; KEY_LENGTH],
    rng: &mut R,
) -> Result<([u8; NONCE_LENGTH], Vec<u8>)> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce = [0u8; NONCE_LENGTH];
    rng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| SecsyncError::crypto("aead encryption failed"))?;
    Ok((nonce, ciphertext))
}

/// Decrypt a ciphertext, verifying the Poly1305 tag over `aad`.
pub fn decrypt_aead(
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
    key: &[u8; KEY_LENGTH],
) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_LENGTH {
        return Err(SecsyncError::crypto("invalid nonce length"));
    }
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| SecsyncError::crypto("aead decryption failed"))
}
