//! Secsync foundation layer.
//!
//! Pure building blocks shared by the protocol codecs, the client state
//! machine, and the server: the unified error type with stable protocol
//! codes, random identifier generation, canonical JSON, and the crypto
//! primitives (XChaCha20-Poly1305 AEAD, detached Ed25519 signatures, and
//! the blake3 snapshot chain). No I/O and no async.

pub mod base64url;
pub mod canonical;
pub mod crypto;
pub mod error;
pub mod id;
pub mod keys;

pub use canonical::{canonicalize, canonicalize_serializable};
pub use error::{ErrorCode, Result, SecsyncError};
pub use id::{generate_id, ID_LENGTH};
pub use keys::{decode_public_key, encode_public_key, SigningKeyPair};

// Re-export commonly used cryptographic types
pub use ed25519_dalek::{
    Signature as Ed25519Signature, SigningKey as Ed25519SigningKey,
    VerifyingKey as Ed25519VerifyingKey,
};

/// Symmetric document/ephemeral key bytes.
pub type SymmetricKey = [u8; crypto::KEY_LENGTH];
