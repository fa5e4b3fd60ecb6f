//! Random identifier generation.
//!
//! Document, snapshot, update, and ephemeral session identifiers are 24
//! random bytes rendered as unpadded base64url.

use crate::base64url;
use rand::{CryptoRng, RngCore};

/// Raw byte length of a generated identifier.
pub const ID_LENGTH: usize = 24;

/// Generate a fresh random identifier.
pub fn generate_id<R: RngCore + CryptoRng>(rng: &mut R) -> String {
    let mut bytes = [0u8; ID_LENGTH];
    rng.fill_bytes(&mut bytes);
    base64url::encode(bytes)
}
