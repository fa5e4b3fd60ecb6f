//! Detached Ed25519 signatures over envelope contents.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Assemble the signed message for an envelope.
///
/// Every envelope kind signs the same concatenation: the base64url nonce,
/// the base64url ciphertext, and the base64url canonical public data. The
/// order is part of the wire format.
pub fn signature_message(nonce_b64: &str, ciphertext_b64: &str, public_data_b64: &str) -> Vec<u8> {
    let mut message =
        Vec::with_capacity(nonce_b64.len() + ciphertext_b64.len() + public_data_b64.len());
    message.extend_from_slice(nonce_b64.as_bytes());
    message.extend_from_slice(ciphertext_b64.as_bytes());
    message.extend_from_slice(public_data_b64.as_bytes());
    message
}

/// Produce a detached signature.
pub fn sign_detached(message: &[u8], signing_key: &SigningKey) -> Signature {
    signing_key.sign(message)
}

/// Verify a detached signature.
pub fn verify_detached(message: &[u8], signature: &Signature, public_key: &VerifyingKey) -> bool {
    public_key.verify(message, signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn sign_verify_roundtrip() {
        let mut rng = ChaCha20Rng::seed_from_u64(6);
        let key = SigningKey::generate(&mut rng);
        let message = signature_message("n", "c", "pd");
        let signature = sign_detached(&message, &key);
        assert!(verify_detached(&message, &signature, &key.verifying_key()));
    }

    #[test]
    fn other_key_does_not_verify() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let key = SigningKey::generate(&mut rng);
        let other = SigningKey::generate(&mut rng);
        let message = signature_message("n", "c", "pd");
        let signature = sign_detached(&message, &key);
        assert!(!verify_detached(&message, &signature, &other.verifying_key()));
    }

    #[test]
    fn field_boundaries_are_not_malleable_in_content() {
        let mut rng = ChaCha20Rng::seed_from_u64(8);
        let key = SigningKey::generate(&mut rng);
        let signature = sign_detached(&signature_message("n", "c", "pd"), &key);
        let moved = signature_message("nc", "", "pd");
        assert!(verify_detached(&moved, &signature, &key.verifying_key()));
        let changed = signature_message("n", "c", "px");
        assert!(!verify_detached(&changed, &signature, &key.verifying_key()));
    }
}
