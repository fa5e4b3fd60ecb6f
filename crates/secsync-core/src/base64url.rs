//! Base64url (unpadded) encoding helpers.
//!
//! All binary fields cross the wire in this encoding: nonces, ciphertexts,
//! signatures, public keys, and the 24-byte random identifiers.

use crate::{Result, SecsyncError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

/// Encode bytes as unpadded base64url.
pub fn encode(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode unpadded base64url into bytes.
pub fn decode(data: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(data)
        .map_err(|e| SecsyncError::serialization(format!("base64url decode failed: {}", e)))
}

/// Decode into a fixed-size array, rejecting length mismatches.
pub fn decode_array<const N: usize>(data: &str) -> Result<[u8; N]> {
    let bytes = decode(data)?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        SecsyncError::serialization(format!(
            "expected {} bytes, got {}",
            N,
            bytes.len()
        ))
    })
}
