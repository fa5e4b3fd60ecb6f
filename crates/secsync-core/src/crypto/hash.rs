//! Snapshot chain proofs.
//!
//! Each snapshot commits to its whole ancestry with
//! `proof_N = blake3(ciphertext_{N-1} || proof_{N-1})` over the base64url
//! wire encodings. Breaking any ancestor ciphertext invalidates every
//! descendant proof.

use crate::base64url;
use subtle::ConstantTimeEq;

/// Compute the chain proof committing to a parent snapshot.
///
/// For the first snapshot of a document both inputs are empty strings.
pub fn chain_proof(parent_ciphertext_b64: &str, grandparent_proof_b64: &str) -> String {
    let mut input =
        Vec::with_capacity(parent_ciphertext_b64.len() + grandparent_proof_b64.len());
    input.extend_from_slice(parent_ciphertext_b64.as_bytes());
    input.extend_from_slice(grandparent_proof_b64.as_bytes());
    base64url::encode(blake3::hash(&input).as_bytes())
}

/// Constant-time comparison of two proofs.
pub fn proofs_match(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_is_sensitive_to_both_inputs() {
        let root = chain_proof("", "");
        let a = chain_proof("ciphertext-a", &root);
        let b = chain_proof("ciphertext-b", &root);
        assert_ne!(a, b);
        assert_ne!(a, chain_proof("ciphertext-a", &a));
    }

    #[test]
    fn proofs_match_is_exact() {
        let proof = chain_proof("c", "p");
        assert!(proofs_match(&proof, &proof));
        assert!(!proofs_match(&proof, &chain_proof("c", "q")));
        assert!(!proofs_match(&proof, ""));
    }
}
