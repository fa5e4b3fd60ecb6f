//! Signing key material.
//!
//! Authors are identified on the wire by the base64url encoding of their
//! Ed25519 verifying key; the same key signs every envelope they produce.

use crate::{base64url, Result, SecsyncError};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::{CryptoRng, RngCore};

/// An owned Ed25519 key pair used to author snapshots, updates, and
/// ephemeral messages.
#[derive(Clone)]
pub struct SigningKeyPair {
    signing_key: SigningKey,
}

impl SigningKeyPair {
    /// Generate a fresh key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            signing_key: SigningKey::generate(rng),
        }
    }

    /// Rebuild a key pair from its 32-byte secret seed.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// The signing half.
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// The verifying half.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The wire representation of the author: base64url verifying key.
    pub fn public_key_base64(&self) -> String {
        encode_public_key(&self.verifying_key())
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secret half is never printed.
        f.debug_struct("SigningKeyPair")
            .field("public_key", &self.public_key_base64())
            .finish()
    }
}

/// Encode a verifying key for the wire.
pub fn encode_public_key(key: &VerifyingKey) -> String {
    base64url::encode(key.as_bytes())
}

/// Decode a wire public key back into a verifying key.
pub fn decode_public_key(encoded: &str) -> Result<VerifyingKey> {
    let bytes = base64url::decode_array::<32>(encoded)?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| SecsyncError::crypto(format!("invalid public key: {}", e)))
}
