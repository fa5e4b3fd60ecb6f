//! Update codec.
//!
//! Updates are incremental changes anchored to a snapshot, carrying a
//! per-author monotonic clock. Verification enforces exact clock
//! succession so an observer can never silently skip or replay a change.

use crate::wire::{Update, UpdatePublicData};
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use rand::{CryptoRng, RngCore};
use secsync_core::crypto::{
    decrypt_aead, encrypt_aead, sign_detached, signature_message, verify_detached,
};
use secsync_core::{base64url, canonicalize_serializable, ErrorCode, Result, SecsyncError, SymmetricKey};

/// Successful verification outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateVerification {
    /// The update verified and decrypted; apply `content` and advance the
    /// author's clock to `clock`.
    Applied { content: Vec<u8>, clock: u64 },
    /// The update is not an error but must not be applied (authored by
    /// this client, or an old clock the caller asked to skip).
    Ignored,
}

/// Inputs controlling update verification.
#[derive(Debug, Clone, Copy)]
pub struct UpdateVerifyParams<'a> {
    /// The document's current active snapshot id.
    pub current_active_snapshot_id: &'a str,
    /// Highest clock applied for this author, -1 when none.
    pub current_clock: i64,
    /// Skip (instead of fail) when the update clock is not ahead of
    /// `current_clock`.
    pub skip_if_current_clock_is_higher: bool,
    /// The update was authored by this client and is already applied.
    pub authored_by_current_client: bool,
}

/// Encrypt and sign an update with the given clock.
pub fn create_update<R: RngCore + CryptoRng>(
    content: &[u8],
    mut public_data: UpdatePublicData,
    key: &SymmetricKey,
    signing_key: &SigningKey,
    clock: u64,
    rng: &mut R,
) -> Result<Update> {
    public_data.clock = clock;

    let public_data_b64 = base64url::encode(canonicalize_serializable(&public_data)?);
    let (nonce, ciphertext) = encrypt_aead(content, public_data_b64.as_bytes(), key, rng)?;
    let nonce_b64 = base64url::encode(nonce);
    let ciphertext_b64 = base64url::encode(&ciphertext);

    let message = signature_message(&nonce_b64, &ciphertext_b64, &public_data_b64);
    let signature = sign_detached(&message, signing_key);

    Ok(Update {
        ciphertext: ciphertext_b64,
        nonce: nonce_b64,
        signature: base64url::encode(signature.to_bytes()),
        public_data,
        server_data: None,
    })
}

/// Verify an update and decrypt its content.
///
/// Signature and AEAD failures are deliberately indistinguishable (both
/// surface as `SECSYNC_ERROR_212`).
pub fn verify_and_decrypt_update(
    update: &Update,
    key: &SymmetricKey,
    author_public_key: &VerifyingKey,
    params: &UpdateVerifyParams<'_>,
) -> Result<UpdateVerification> {
    if params.authored_by_current_client {
        return Ok(UpdateVerification::Ignored);
    }

    let public_data_b64 = base64url::encode(canonicalize_serializable(&update.public_data)?);

    let signature_bytes = base64url::decode_array::<64>(&update.signature)
        .map_err(|_| SecsyncError::protocol(ErrorCode::UpdateIntegrityFailed))?;
    let signature = Signature::from_bytes(&signature_bytes);
    let message = signature_message(&update.nonce, &update.ciphertext, &public_data_b64);
    if !verify_detached(&message, &signature, author_public_key) {
        return Err(ErrorCode::UpdateIntegrityFailed.into());
    }

    if update.public_data.ref_snapshot_id != params.current_active_snapshot_id {
        return Err(ErrorCode::UpdateWrongSnapshot.into());
    }

    let clock = update.public_data.clock;
    if params.skip_if_current_clock_is_higher && (clock as i64) <= params.current_clock {
        return Ok(UpdateVerification::Ignored);
    }
    if clock as i64 != params.current_clock + 1 {
        return Err(ErrorCode::UpdateClockMismatch.into());
    }

    let nonce = base64url::decode(&update.nonce)
        .map_err(|_| SecsyncError::protocol(ErrorCode::UpdateIntegrityFailed))?;
    let ciphertext = base64url::decode(&update.ciphertext)
        .map_err(|_| SecsyncError::protocol(ErrorCode::UpdateIntegrityFailed))?;
    let content = decrypt_aead(&nonce, &ciphertext, public_data_b64.as_bytes(), key)
        .map_err(|_| SecsyncError::protocol(ErrorCode::UpdateIntegrityFailed))?;

    Ok(UpdateVerification::Applied { content, clock })
}
