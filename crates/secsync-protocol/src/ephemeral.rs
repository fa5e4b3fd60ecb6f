//! Ephemeral message codec.
//!
//! Ephemeral messages carry presence/awareness data that is never
//! persisted. The AEAD plaintext has a fixed binary header:
//!
//! ```text
//! [messageType: 1 byte][sessionId: 24 bytes][sessionCounter: u32 BE][body]
//! ```
//!
//! The session handshake (initialize/proof) and the per-peer counter give
//! replay protection within a session; see [`crate::session`].

use crate::session::{create_session_proof, verify_session_proof, EphemeralSession, PeerSession};
use crate::wire::{EphemeralMessage, EphemeralPublicData};
use ed25519_dalek::{Signature, VerifyingKey};
use rand::{CryptoRng, RngCore};
use secsync_core::crypto::{
    decrypt_aead, encrypt_aead, sign_detached, signature_message, verify_detached,
};
use secsync_core::{
    base64url, canonicalize_serializable, ErrorCode, Result, SecsyncError, SigningKeyPair,
    SymmetricKey, ID_LENGTH,
};

/// Discriminant of the ephemeral plaintext header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EphemeralMessageType {
    /// Announce a fresh session and ask peers for proofs.
    Initialize,
    /// A session proof.
    Proof,
    /// A session proof that also requests one back.
    ProofAndRequestProof,
    /// An application payload.
    Message,
}

impl EphemeralMessageType {
    fn as_byte(self) -> u8 {
        match self {
            Self::Initialize => 0,
            Self::Proof => 1,
            Self::ProofAndRequestProof => 2,
            Self::Message => 3,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Initialize),
            1 => Some(Self::Proof),
            2 => Some(Self::ProofAndRequestProof),
            3 => Some(Self::Message),
            _ => None,
        }
    }
}

const HEADER_LENGTH: usize = 1 + ID_LENGTH + 4;

/// Decoded plaintext of an ephemeral message.
#[derive(Debug, Clone, PartialEq, Eq)]
struct EphemeralPayload {
    message_type: EphemeralMessageType,
    session_id: String,
    session_counter: u32,
    body: Vec<u8>,
}

fn frame_payload(
    message_type: EphemeralMessageType,
    session_id: &str,
    session_counter: u32,
    body: &[u8],
) -> Result<Vec<u8>> {
    let session_id_bytes = base64url::decode_array::<ID_LENGTH>(session_id)?;
    let mut payload = Vec::with_capacity(HEADER_LENGTH + body.len());
    payload.push(message_type.as_byte());
    payload.extend_from_slice(&session_id_bytes);
    payload.extend_from_slice(&session_counter.to_be_bytes());
    payload.extend_from_slice(body);
    Ok(payload)
}

fn parse_payload(bytes: &[u8]) -> Result<EphemeralPayload> {
    if bytes.len() < HEADER_LENGTH {
        return Err(ErrorCode::EphemeralUnknownMessageType.into());
    }
    let message_type = EphemeralMessageType::from_byte(bytes[0])
        .ok_or(SecsyncError::protocol(ErrorCode::EphemeralUnknownMessageType))?;
    let session_id = base64url::encode(&bytes[1..1 + ID_LENGTH]);
    let mut counter_bytes = [0u8; 4];
    counter_bytes.copy_from_slice(&bytes[1 + ID_LENGTH..HEADER_LENGTH]);
    Ok(EphemeralPayload {
        message_type,
        session_id,
        session_counter: u32::from_be_bytes(counter_bytes),
        body: bytes[HEADER_LENGTH..].to_vec(),
    })
}

/// What the receiving side should do with a verified ephemeral message.
#[derive(Debug, Clone, Default)]
pub struct EphemeralOutcome {
    /// Application body to hand to the host, for `Message` payloads.
    pub content: Option<Vec<u8>>,
    /// A proof envelope to send back immediately.
    pub reply: Option<EphemeralMessage>,
    /// A soft error to record while still acting on `reply`.
    pub error: Option<ErrorCode>,
}

/// Encrypt and sign an ephemeral message, consuming one session counter.
pub fn create_ephemeral_message<R: RngCore + CryptoRng>(
    body: &[u8],
    message_type: EphemeralMessageType,
    session: &mut EphemeralSession,
    doc_id: &str,
    key: &SymmetricKey,
    signing_key_pair: &SigningKeyPair,
    rng: &mut R,
) -> Result<EphemeralMessage> {
    let public_data = EphemeralPublicData {
        doc_id: doc_id.to_string(),
        pub_key: signing_key_pair.public_key_base64(),
    };
    let payload = frame_payload(message_type, &session.id, session.counter, body)?;

    let public_data_b64 = base64url::encode(canonicalize_serializable(&public_data)?);
    let (nonce, ciphertext) = encrypt_aead(&payload, public_data_b64.as_bytes(), key, rng)?;
    let nonce_b64 = base64url::encode(nonce);
    let ciphertext_b64 = base64url::encode(&ciphertext);

    let message = signature_message(&nonce_b64, &ciphertext_b64, &public_data_b64);
    let signature = sign_detached(&message, signing_key_pair.signing_key());

    session.counter = session.counter.wrapping_add(1);

    Ok(EphemeralMessage {
        ciphertext: ciphertext_b64,
        nonce: nonce_b64,
        signature: base64url::encode(signature.to_bytes()),
        public_data,
    })
}

fn proof_reply<R: RngCore + CryptoRng>(
    receiver_session_id: &str,
    message_type: EphemeralMessageType,
    session: &mut EphemeralSession,
    doc_id: &str,
    key: &SymmetricKey,
    signing_key_pair: &SigningKeyPair,
    rng: &mut R,
) -> Result<EphemeralMessage> {
    let proof = create_session_proof(receiver_session_id, &session.id, signing_key_pair.signing_key());
    create_ephemeral_message(
        &proof.to_bytes(),
        message_type,
        session,
        doc_id,
        key,
        signing_key_pair,
        rng,
    )
}

/// Verify an incoming ephemeral message and decide what to do with it.
///
/// Hard failures are returned as protocol errors; the
/// no-valid-session case is a soft error because a proof exchange must be
/// triggered alongside recording it.
#[allow(clippy::too_many_arguments)]
pub fn verify_and_decrypt_ephemeral_message<R: RngCore + CryptoRng>(
    message: &EphemeralMessage,
    key: &SymmetricKey,
    session: &mut EphemeralSession,
    author_public_key: &VerifyingKey,
    current_doc_id: &str,
    signing_key_pair: &SigningKeyPair,
    rng: &mut R,
) -> Result<EphemeralOutcome> {
    if message.public_data.doc_id != current_doc_id {
        return Err(ErrorCode::EphemeralDocIdMismatch.into());
    }

    let public_data_b64 = base64url::encode(canonicalize_serializable(&message.public_data)?);

    let signature_bytes = base64url::decode_array::<64>(&message.signature)
        .map_err(|_| SecsyncError::protocol(ErrorCode::EphemeralSignatureInvalid))?;
    let signature = Signature::from_bytes(&signature_bytes);
    let signed = signature_message(&message.nonce, &message.ciphertext, &public_data_b64);
    if !verify_detached(&signed, &signature, author_public_key) {
        return Err(ErrorCode::EphemeralSignatureInvalid.into());
    }

    let nonce = base64url::decode(&message.nonce)
        .map_err(|_| SecsyncError::protocol(ErrorCode::EphemeralDecryptionFailed))?;
    let ciphertext = base64url::decode(&message.ciphertext)
        .map_err(|_| SecsyncError::protocol(ErrorCode::EphemeralDecryptionFailed))?;
    let payload_bytes = decrypt_aead(&nonce, &ciphertext, public_data_b64.as_bytes(), key)
        .map_err(|_| SecsyncError::protocol(ErrorCode::EphemeralDecryptionFailed))?;
    let payload = parse_payload(&payload_bytes)?;

    let author = message.public_data.pub_key.clone();
    match payload.message_type {
        EphemeralMessageType::Initialize => {
            let reply = proof_reply(
                &payload.session_id,
                EphemeralMessageType::ProofAndRequestProof,
                session,
                current_doc_id,
                key,
                signing_key_pair,
                rng,
            )?;
            Ok(EphemeralOutcome {
                reply: Some(reply),
                ..Default::default()
            })
        }
        EphemeralMessageType::Proof | EphemeralMessageType::ProofAndRequestProof => {
            let proof = Signature::from_slice(&payload.body)
                .map_err(|_| SecsyncError::protocol(ErrorCode::EphemeralSignatureInvalid))?;
            if !verify_session_proof(&session.id, &payload.session_id, &proof, author_public_key) {
                tracing::warn!(author = %author, "discarding ephemeral message with invalid session proof");
                return Ok(EphemeralOutcome::default());
            }
            session.valid_sessions.insert(
                author,
                PeerSession {
                    session_id: payload.session_id.clone(),
                    session_counter: payload.session_counter,
                },
            );
            let reply = if payload.message_type == EphemeralMessageType::ProofAndRequestProof {
                Some(proof_reply(
                    &payload.session_id,
                    EphemeralMessageType::Proof,
                    session,
                    current_doc_id,
                    key,
                    signing_key_pair,
                    rng,
                )?)
            } else {
                None
            };
            Ok(EphemeralOutcome {
                reply,
                ..Default::default()
            })
        }
        EphemeralMessageType::Message => {
            let known = session.valid_sessions.get_mut(&author);
            match known {
                Some(peer) if peer.session_id == payload.session_id => {
                    if peer.session_counter >= payload.session_counter {
                        return Err(ErrorCode::EphemeralReplay.into());
                    }
                    peer.session_counter = payload.session_counter;
                    Ok(EphemeralOutcome {
                        content: Some(payload.body),
                        ..Default::default()
                    })
                }
                _ => {
                    let reply = proof_reply(
                        &payload.session_id,
                        EphemeralMessageType::ProofAndRequestProof,
                        session,
                        current_doc_id,
                        key,
                        signing_key_pair,
                        rng,
                    )?;
                    Ok(EphemeralOutcome {
                        reply: Some(reply),
                        error: Some(ErrorCode::EphemeralNoValidSession),
                        ..Default::default()
                    })
                }
            }
        }
    }
}
