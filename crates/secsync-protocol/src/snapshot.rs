//! Snapshot codec.
//!
//! A snapshot is an AEAD-encrypted full-state checkpoint whose canonical
//! public data is both the associated data and (together with nonce and
//! ciphertext) the signed payload. Each snapshot commits to its ancestry
//! via the parent chain proof.

use crate::wire::{Snapshot, SnapshotPublicData};
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use rand::{CryptoRng, RngCore};
use secsync_core::crypto::{
    chain_proof, decrypt_aead, encrypt_aead, proofs_match, sign_detached, signature_message,
    verify_detached,
};
use secsync_core::{base64url, canonicalize_serializable, ErrorCode, Result, SecsyncError, SymmetricKey};
use std::collections::BTreeMap;

/// Chain context and local knowledge used to verify a snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotVerifyParams<'a> {
    /// Document the client is connected to.
    pub current_doc_id: &'a str,
    /// Base64url ciphertext of the known parent snapshot, when the client
    /// has chain context to check against.
    pub parent_snapshot_ciphertext: Option<&'a str>,
    /// Chain proof of the grandparent snapshot (empty string at the root).
    pub grandparent_snapshot_proof: Option<&'a str>,
    /// Update clocks this client has already applied per author; a
    /// snapshot recording lower values silently dropped updates.
    pub observed_update_clocks: Option<&'a BTreeMap<String, u64>>,
}

/// Encrypt and sign a snapshot.
///
/// Computes the parent chain proof from the parent ciphertext and the
/// grandparent proof and stores it in the public data before
/// canonicalization. Both chain inputs are empty strings for the first
/// snapshot of a document.
pub fn create_snapshot<R: RngCore + CryptoRng>(
    content: &[u8],
    mut public_data: SnapshotPublicData,
    key: &SymmetricKey,
    signing_key: &SigningKey,
    parent_snapshot_ciphertext: &str,
    grandparent_snapshot_proof: &str,
    rng: &mut R,
) -> Result<Snapshot> {
    public_data.parent_snapshot_proof =
        chain_proof(parent_snapshot_ciphertext, grandparent_snapshot_proof);

    let public_data_b64 = base64url::encode(canonicalize_serializable(&public_data)?);
    let (nonce, ciphertext) = encrypt_aead(content, public_data_b64.as_bytes(), key, rng)?;
    let nonce_b64 = base64url::encode(nonce);
    let ciphertext_b64 = base64url::encode(&ciphertext);

    let message = signature_message(&nonce_b64, &ciphertext_b64, &public_data_b64);
    let signature = sign_detached(&message, signing_key);

    Ok(Snapshot {
        ciphertext: ciphertext_b64,
        nonce: nonce_b64,
        signature: base64url::encode(signature.to_bytes()),
        public_data,
        server_data: None,
    })
}

/// Verify a snapshot and decrypt its content.
///
/// Checks, in order: the author signature, the parent chain proof (when
/// the caller supplies chain context), the document id, the recorded
/// parent update clocks against locally applied ones, and finally the
/// AEAD tag during decryption.
pub fn verify_and_decrypt_snapshot(
    snapshot: &Snapshot,
    key: &SymmetricKey,
    author_public_key: &VerifyingKey,
    params: &SnapshotVerifyParams<'_>,
) -> Result<Vec<u8>> {
    let public_data_b64 = base64url::encode(canonicalize_serializable(&snapshot.public_data)?);

    let signature_bytes = base64url::decode_array::<64>(&snapshot.signature)
        .map_err(|_| SecsyncError::protocol(ErrorCode::SnapshotSignatureInvalid))?;
    let signature = Signature::from_bytes(&signature_bytes);
    let message = signature_message(&snapshot.nonce, &snapshot.ciphertext, &public_data_b64);
    if !verify_detached(&message, &signature, author_public_key) {
        return Err(ErrorCode::SnapshotSignatureInvalid.into());
    }

    if let (Some(parent_ciphertext), Some(grandparent_proof)) = (
        params.parent_snapshot_ciphertext,
        params.grandparent_snapshot_proof,
    ) {
        let expected = chain_proof(parent_ciphertext, grandparent_proof);
        if !proofs_match(&expected, &snapshot.public_data.parent_snapshot_proof) {
            return Err(ErrorCode::SnapshotProofMismatch.into());
        }
    }

    if snapshot.public_data.doc_id != params.current_doc_id {
        return Err(ErrorCode::SnapshotDocIdMismatch.into());
    }

    if let Some(observed) = params.observed_update_clocks {
        for (author, observed_clock) in observed {
            let recorded = snapshot
                .public_data
                .parent_snapshot_update_clocks
                .get(author);
            match recorded {
                Some(recorded_clock) if recorded_clock >= observed_clock => {}
                _ => return Err(ErrorCode::SnapshotMissedUpdates.into()),
            }
        }
    }

    let nonce = base64url::decode(&snapshot.nonce)
        .map_err(|_| SecsyncError::protocol(ErrorCode::SnapshotDecryptionFailed))?;
    let ciphertext = base64url::decode(&snapshot.ciphertext)
        .map_err(|_| SecsyncError::protocol(ErrorCode::SnapshotDecryptionFailed))?;
    decrypt_aead(&nonce, &ciphertext, public_data_b64.as_bytes(), key)
        .map_err(|_| SecsyncError::protocol(ErrorCode::SnapshotDecryptionFailed))
}
