//! Ephemeral message sessions.
//!
//! Each client process keeps one session per document: a random 24-byte id
//! and a monotonically increasing counter stamped into every ephemeral
//! message it authors. Peers become valid senders once they prove, with a
//! signature over both session ids, that they are live participants of the
//! current session exchange; the stored counter then rejects replays.

use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use rand::{CryptoRng, RngCore};
use secsync_core::crypto::{sign_detached, verify_detached};
use secsync_core::generate_id;
use std::collections::BTreeMap;

/// A peer the local session accepts ephemeral messages from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSession {
    /// The peer's session id as carried in its message headers.
    pub session_id: String,
    /// Highest counter observed from the peer within this session.
    pub session_counter: u32,
}

/// Per-document ephemeral messaging state for one client process.
#[derive(Debug, Clone)]
pub struct EphemeralSession {
    /// This client's session id (24 random bytes, base64url).
    pub id: String,
    /// Counter stamped into the next authored message.
    pub counter: u32,
    /// Verified peers keyed by author public key.
    pub valid_sessions: BTreeMap<String, PeerSession>,
}

impl EphemeralSession {
    /// Start a fresh session with a random id and counter 0.
    pub fn new<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            id: generate_id(rng),
            counter: 0,
            valid_sessions: BTreeMap::new(),
        }
    }
}

/// Sign a session proof addressed to a peer.
///
/// The signed bytes are `receiver_session_id || own_session_id`; the
/// receiver reconstructs the same concatenation from its own id and the
/// sender id in the message header.
pub fn create_session_proof(
    receiver_session_id: &str,
    own_session_id: &str,
    signing_key: &SigningKey,
) -> Signature {
    let mut message = Vec::with_capacity(receiver_session_id.len() + own_session_id.len());
    message.extend_from_slice(receiver_session_id.as_bytes());
    message.extend_from_slice(own_session_id.as_bytes());
    sign_detached(&message, signing_key)
}

/// Verify a session proof received from a peer.
pub fn verify_session_proof(
    own_session_id: &str,
    sender_session_id: &str,
    signature: &Signature,
    sender_public_key: &VerifyingKey,
) -> bool {
    let mut message = Vec::with_capacity(own_session_id.len() + sender_session_id.len());
    message.extend_from_slice(own_session_id.as_bytes());
    message.extend_from_slice(sender_session_id.as_bytes());
    verify_detached(&message, signature, sender_public_key)
}
