//! Per-connection sync context.
//!
//! Owned exclusively by the sync machine. Everything except the pending
//! local changes is per-connection state and is rebuilt after a
//! reconnect; pending changes survive so offline edits are not lost.

use crate::ring::ErrorRing;
use rand::{CryptoRng, RngCore};
use secsync_protocol::session::EphemeralSession;
use secsync_protocol::wire::{ServerFrame, Update};
use secsync_core::SymmetricKey;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

/// Where document decryption currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentDecryptionState {
    /// No document frame processed yet.
    #[default]
    Pending,
    /// The snapshot applied but an attached update failed.
    Partial,
    /// Snapshot and all attached updates applied.
    Complete,
    /// The snapshot itself could not be verified or decrypted.
    Failed,
}

/// What the client knows about one snapshot in the chain.
#[derive(Debug, Clone, Default)]
pub struct SnapshotInfo {
    /// Snapshot id.
    pub snapshot_id: String,
    /// Wire ciphertext; input to the child's chain proof.
    pub ciphertext: String,
    /// This snapshot's own chain proof.
    pub parent_snapshot_proof: String,
    /// Per-author clocks applied on top of this snapshot.
    pub update_clocks: BTreeMap<String, u64>,
}

/// An update sent but not yet confirmed by the server.
#[derive(Debug, Clone)]
pub struct UpdateInFlight {
    /// The clock the update was sent with.
    pub clock: u64,
    /// The exact envelope, kept for identical resubmission.
    pub envelope: Update,
    /// The decoded changes, kept for re-anchoring after a snapshot change.
    pub changes: Vec<Value>,
}

/// A snapshot sent but not yet confirmed by the server.
#[derive(Debug, Clone)]
pub struct SnapshotInFlight {
    /// Id of the snapshot awaiting confirmation.
    pub snapshot_id: String,
    /// Its wire ciphertext (future chain input).
    pub ciphertext: String,
    /// Its chain proof.
    pub parent_snapshot_proof: String,
    /// Clocks recorded into its public data.
    pub update_clocks: BTreeMap<String, u64>,
}

/// The sync machine's working state for one document connection.
#[derive(Debug)]
pub struct SyncContext {
    /// Latest accepted snapshot id, `None` for a brand-new document.
    pub active_snapshot_id: Option<String>,
    /// Highest server version observed for the active snapshot.
    pub latest_server_version: Option<u64>,
    /// Decryption progress of the initial document load.
    pub document_decryption_state: DocumentDecryptionState,
    /// Protocol frames awaiting processing, drained FIFO.
    pub incoming_queue: VecDeque<ServerFrame>,
    /// Unknown-type frames awaiting host handling.
    pub custom_message_queue: VecDeque<Value>,
    /// Local changes not yet bundled into an update.
    pub pending_changes_queue: Vec<Value>,
    /// Snapshot awaiting server confirmation.
    pub snapshot_in_flight: Option<SnapshotInFlight>,
    /// Updates awaiting server confirmation.
    pub updates_in_flight: Vec<UpdateInFlight>,
    /// Chain knowledge, most recent last.
    pub snapshot_infos_with_update_clocks: Vec<SnapshotInfo>,
    /// Clock of this client's last sent update; next-to-send is +1.
    pub updates_local_clock: i64,
    /// Key of the active snapshot, cached for authoring updates.
    pub document_key: Option<SymmetricKey>,
    /// Ephemeral messaging state.
    pub ephemeral_session: EphemeralSession,
    /// Errors hit while receiving ephemeral messages.
    pub receiving_ephemeral_errors: ErrorRing,
    /// Errors hit while creating ephemeral messages.
    pub creating_ephemeral_errors: ErrorRing,
    /// Ciphertext fingerprints per `(snapshot, author, clock)` tuple,
    /// backing the update replay filter.
    pub observed_update_fingerprints: BTreeMap<(String, String, u64), String>,
}

impl SyncContext {
    /// Fresh context for a new connection.
    pub fn new<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            active_snapshot_id: None,
            latest_server_version: None,
            document_decryption_state: DocumentDecryptionState::Pending,
            incoming_queue: VecDeque::new(),
            custom_message_queue: VecDeque::new(),
            pending_changes_queue: Vec::new(),
            snapshot_in_flight: None,
            updates_in_flight: Vec::new(),
            snapshot_infos_with_update_clocks: Vec::new(),
            updates_local_clock: -1,
            document_key: None,
            ephemeral_session: EphemeralSession::new(rng),
            receiving_ephemeral_errors: ErrorRing::default(),
            creating_ephemeral_errors: ErrorRing::default(),
            observed_update_fingerprints: BTreeMap::new(),
        }
    }

    /// Reset per-connection state for a reconnect.
    ///
    /// Pending local changes survive; the next `document` frame re-seeds
    /// everything else.
    pub fn reset_for_reconnect<R: RngCore + CryptoRng>(&mut self, rng: &mut R) {
        self.active_snapshot_id = None;
        self.latest_server_version = None;
        self.document_decryption_state = DocumentDecryptionState::Pending;
        self.incoming_queue.clear();
        self.custom_message_queue.clear();
        self.snapshot_in_flight = None;
        self.updates_in_flight.clear();
        self.snapshot_infos_with_update_clocks.clear();
        self.updates_local_clock = -1;
        self.document_key = None;
        self.ephemeral_session = EphemeralSession::new(rng);
        self.receiving_ephemeral_errors.clear();
        self.creating_ephemeral_errors.clear();
        self.observed_update_fingerprints.clear();
    }

    /// Chain info of the active snapshot.
    pub fn active_snapshot_info(&self) -> Option<&SnapshotInfo> {
        let active = self.active_snapshot_id.as_deref()?;
        self.snapshot_infos_with_update_clocks
            .iter()
            .rev()
            .find(|info| info.snapshot_id == active)
    }

    /// Mutable chain info of the active snapshot.
    pub fn active_snapshot_info_mut(&mut self) -> Option<&mut SnapshotInfo> {
        let active = self.active_snapshot_id.clone()?;
        self.snapshot_infos_with_update_clocks
            .iter_mut()
            .rev()
            .find(|info| info.snapshot_id == active)
    }

    /// Highest applied clock for an author on the active snapshot, -1 if
    /// none.
    pub fn author_clock(&self, author_public_key: &str) -> i64 {
        self.active_snapshot_info()
            .and_then(|info| info.update_clocks.get(author_public_key))
            .map(|clock| *clock as i64)
            .unwrap_or(-1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use secsync_core::{ErrorCode, SecsyncError};

    #[test]
    fn reconnect_resets_everything_but_pending_changes() {
        let mut rng = ChaCha20Rng::seed_from_u64(50);
        let mut ctx = SyncContext::new(&mut rng);
        ctx.active_snapshot_id = Some("snap".into());
        ctx.latest_server_version = Some(3);
        ctx.updates_local_clock = 7;
        ctx.pending_changes_queue.push(serde_json::json!({"op": 1}));
        ctx.document_decryption_state = DocumentDecryptionState::Complete;
        ctx.receiving_ephemeral_errors
            .push(SecsyncError::protocol(ErrorCode::EphemeralReplay));
        let old_session = ctx.ephemeral_session.id.clone();

        ctx.reset_for_reconnect(&mut rng);

        assert_eq!(ctx.active_snapshot_id, None);
        assert_eq!(ctx.latest_server_version, None);
        assert_eq!(ctx.updates_local_clock, -1);
        assert_eq!(
            ctx.document_decryption_state,
            DocumentDecryptionState::Pending
        );
        assert!(ctx.receiving_ephemeral_errors.is_empty());
        assert_ne!(ctx.ephemeral_session.id, old_session);
        assert_eq!(ctx.pending_changes_queue.len(), 1);
    }

    #[test]
    fn author_clock_defaults_to_minus_one() {
        let mut rng = ChaCha20Rng::seed_from_u64(51);
        let mut ctx = SyncContext::new(&mut rng);
        assert_eq!(ctx.author_clock("somebody"), -1);

        ctx.active_snapshot_id = Some("snap".into());
        ctx.snapshot_infos_with_update_clocks.push(SnapshotInfo {
            snapshot_id: "snap".into(),
            update_clocks: [("somebody".to_string(), 4)].into(),
            ..Default::default()
        });
        assert_eq!(ctx.author_clock("somebody"), 4);
        assert_eq!(ctx.author_clock("someone-else"), -1);
    }
}
