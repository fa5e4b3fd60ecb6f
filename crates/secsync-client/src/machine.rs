//! The sync state machine.
//!
//! One machine owns one document connection. Events are handled one at a
//! time to completion; transport work is returned as effects and host
//! callbacks are awaited in place, so the context is never observed
//! mid-transition.

use crate::config::SyncConfig;
use crate::context::{
    DocumentDecryptionState, SnapshotInFlight, SnapshotInfo, SyncContext, UpdateInFlight,
};
use crate::event::{SyncEffect, SyncEvent};
use crate::host::SyncHost;
use rand::{CryptoRng, RngCore};
use secsync_core::crypto::proofs_match;
use secsync_core::{decode_public_key, ErrorCode, SecsyncError};
use secsync_protocol::ephemeral::{
    create_ephemeral_message, verify_and_decrypt_ephemeral_message, EphemeralMessageType,
};
use secsync_protocol::snapshot::{
    create_snapshot, verify_and_decrypt_snapshot, SnapshotVerifyParams,
};
use secsync_protocol::update::{
    create_update, verify_and_decrypt_update, UpdateVerification, UpdateVerifyParams,
};
use secsync_protocol::wire::{
    ClientFrame, DocumentFrame, EphemeralMessage, ServerFrame, Snapshot, SnapshotPublicData,
    Update, UpdatePublicData,
};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, error, warn};

/// Connection lifecycle of the sync machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not connected and not trying to be.
    Disconnected,
    /// Waiting for the socket to open.
    Connecting {
        /// Whether this attempt follows a lost connection.
        retrying: bool,
    },
    /// Socket open, processing frames.
    Connected,
    /// Fatal failure; the host decides whether to discard the document.
    Failed,
}

/// Result of applying one server update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateApplyOutcome {
    Applied,
    Ignored,
    Failed,
}

/// Which path delivered an update to the machine.
///
/// Live broadcasts get the strict replay filter; the recovery path
/// tolerates identical re-deliveries because `snapshot-save-failed` may
/// attach updates the client already applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateSource {
    DocumentLoad,
    Broadcast,
    Recovery,
}

/// State machine coordinating snapshots, updates, pending changes, and
/// the ephemeral sub-protocol for one document.
pub struct SyncMachine<R: RngCore + CryptoRng> {
    config: SyncConfig,
    own_public_key: String,
    state: SyncState,
    context: SyncContext,
    last_error: Option<SecsyncError>,
    rng: R,
}

impl<R: RngCore + CryptoRng> SyncMachine<R> {
    /// Create a machine in the `Connecting` state.
    pub fn new(config: SyncConfig, mut rng: R) -> Self {
        let own_public_key = config.signature_key_pair.public_key_base64();
        let context = SyncContext::new(&mut rng);
        Self {
            config,
            own_public_key,
            state: SyncState::Connecting { retrying: false },
            context,
            last_error: None,
            rng,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// The working context (read-only).
    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    /// The error that moved the machine into `Failed`, if any.
    pub fn last_error(&self) -> Option<&SecsyncError> {
        self.last_error.as_ref()
    }

    /// Handle one event to completion and return transport effects.
    pub async fn handle_event<H: SyncHost>(
        &mut self,
        event: SyncEvent,
        host: &H,
    ) -> Vec<SyncEffect> {
        let mut effects = Vec::new();
        match event {
            SyncEvent::Disconnect => {
                self.state = SyncState::Disconnected;
                effects.push(SyncEffect::CloseConnection);
            }
            _ if self.state == SyncState::Failed => {
                debug!("event ignored in failed state");
            }
            SyncEvent::WebsocketConnected => {
                self.context.reset_for_reconnect(&mut self.rng);
                self.state = SyncState::Connected;
                debug!(doc_id = %self.config.document_id, "connected");
            }
            SyncEvent::WebsocketDisconnected => {
                if self.state != SyncState::Disconnected {
                    self.state = SyncState::Connecting { retrying: true };
                }
            }
            SyncEvent::WebsocketRetry => {
                self.state = SyncState::Connecting { retrying: true };
            }
            SyncEvent::WebsocketAddToIncomingQueue(frame) => {
                self.context.incoming_queue.push_back(*frame);
                self.drain_incoming_queue(host, &mut effects).await;
            }
            SyncEvent::WebsocketAddToCustomMessageQueue(message) => {
                self.context.custom_message_queue.push_back(message);
                self.drain_custom_message_queue(host).await;
            }
            SyncEvent::AddChanges(changes) => {
                self.context.pending_changes_queue.extend(changes);
                self.maybe_send_update(host, &mut effects).await;
            }
            SyncEvent::CreateSnapshot => {
                self.initiate_snapshot(host, &mut effects).await;
            }
            SyncEvent::FailedCreatingEphemeralMessage(err) => {
                self.context.creating_ephemeral_errors.push(err);
            }
            SyncEvent::SendEphemeralMessage { body, message_type } => {
                self.send_ephemeral_message(&body, message_type, host, &mut effects)
                    .await;
            }
        }
        effects
    }

    fn fail(&mut self, err: SecsyncError) {
        error!(error = %err, doc_id = %self.config.document_id, "entering failed state");
        self.state = SyncState::Failed;
        self.last_error = Some(err);
    }

    async fn drain_incoming_queue<H: SyncHost>(
        &mut self,
        host: &H,
        effects: &mut Vec<SyncEffect>,
    ) {
        while self.state == SyncState::Connected {
            let Some(frame) = self.context.incoming_queue.pop_front() else {
                break;
            };
            self.process_incoming(frame, host, effects).await;
        }
    }

    async fn drain_custom_message_queue<H: SyncHost>(&mut self, host: &H) {
        while self.state == SyncState::Connected {
            let Some(message) = self.context.custom_message_queue.pop_front() else {
                break;
            };
            if let Err(err) = host.handle_custom_message(message).await {
                warn!(error = %err, "host failed to handle custom message");
            }
        }
    }

    async fn process_incoming<H: SyncHost>(
        &mut self,
        frame: ServerFrame,
        host: &H,
        effects: &mut Vec<SyncEffect>,
    ) {
        match frame {
            ServerFrame::Document(document) => {
                self.handle_document(document, host, effects).await;
            }
            ServerFrame::Snapshot { snapshot } => {
                if self.apply_server_snapshot(snapshot, host).await {
                    self.maybe_send_update(host, effects).await;
                }
            }
            ServerFrame::SnapshotSaved { snapshot_id, .. } => {
                self.handle_snapshot_saved(snapshot_id, host, effects).await;
            }
            ServerFrame::SnapshotSaveFailed {
                snapshot, updates, ..
            } => {
                self.handle_snapshot_save_failed(snapshot, updates, host, effects)
                    .await;
            }
            ServerFrame::Update(update) => {
                self.apply_server_update(update, host, UpdateSource::Broadcast)
                    .await;
            }
            ServerFrame::UpdateSaved {
                snapshot_id,
                clock,
                server_version,
                ..
            } => {
                self.handle_update_saved(&snapshot_id, clock, server_version);
            }
            ServerFrame::UpdateSaveFailed {
                snapshot_id, clock, ..
            } => {
                self.handle_update_save_failed(&snapshot_id, clock, effects);
            }
            ServerFrame::EphemeralMessage(message) => {
                self.handle_ephemeral_message(message, host, effects).await;
            }
            ServerFrame::DocumentNotFound => {
                self.fail(SecsyncError::invalid("document not found"));
            }
            ServerFrame::Unauthorized => {
                self.fail(SecsyncError::invalid("unauthorized"));
            }
            ServerFrame::DocumentError => {
                self.fail(SecsyncError::invalid("server-side document error"));
            }
        }
    }

    /// Initial document delivery: seed the context from the snapshot,
    /// replay the attached updates in order, then flush local changes.
    async fn handle_document<H: SyncHost>(
        &mut self,
        document: DocumentFrame,
        host: &H,
        effects: &mut Vec<SyncEffect>,
    ) {
        if document.snapshot.is_none() {
            self.context.document_decryption_state = DocumentDecryptionState::Complete;
            if host.should_create_new_snapshot(&document).await {
                self.initiate_snapshot(host, effects).await;
            }
            self.send_session_initialize(host, effects).await;
            return;
        }

        let DocumentFrame { snapshot, updates } = document;
        let Some(snapshot) = snapshot else {
            return;
        };
        if !self.apply_server_snapshot(snapshot, host).await {
            self.context.document_decryption_state = DocumentDecryptionState::Failed;
            return;
        }
        for update in updates {
            match self
                .apply_server_update(update, host, UpdateSource::DocumentLoad)
                .await
            {
                UpdateApplyOutcome::Applied | UpdateApplyOutcome::Ignored => {}
                UpdateApplyOutcome::Failed => {
                    self.context.document_decryption_state = DocumentDecryptionState::Partial;
                    return;
                }
            }
        }
        self.context.document_decryption_state = DocumentDecryptionState::Complete;
        // Own updates from a previous session continue the clock.
        self.context.updates_local_clock = self.context.author_clock(&self.own_public_key);
        self.send_session_initialize(host, effects).await;
        self.maybe_send_update(host, effects).await;
    }

    /// Chain context for verifying an incoming snapshot: the active
    /// snapshot if the new one extends it, otherwise the configured known
    /// snapshot from a previous session.
    fn chain_info_for(&self, snapshot: &Snapshot) -> Option<SnapshotInfo> {
        if let Some(info) = self.context.active_snapshot_info() {
            if snapshot.public_data.parent_snapshot_id == info.snapshot_id {
                return Some(info.clone());
            }
        }
        if let Some(known) = &self.config.known_snapshot_info {
            if snapshot.public_data.parent_snapshot_id == known.snapshot_id {
                return Some(SnapshotInfo {
                    snapshot_id: known.snapshot_id.clone(),
                    ciphertext: known.snapshot_ciphertext.clone(),
                    parent_snapshot_proof: known.parent_snapshot_proof.clone(),
                    update_clocks: known.update_clocks.clone(),
                });
            }
        }
        None
    }

    /// Verify, decrypt, and apply a snapshot, making it active.
    ///
    /// Used for the initial document load, live snapshot broadcasts, and
    /// snapshots attached to `snapshot-save-failed`. Any failure is fatal.
    async fn apply_server_snapshot<H: SyncHost>(&mut self, snapshot: Snapshot, host: &H) -> bool {
        if self.context.active_snapshot_id.as_deref()
            == Some(snapshot.public_data.snapshot_id.as_str())
        {
            debug!(snapshot_id = %snapshot.public_data.snapshot_id, "snapshot already active");
            return true;
        }
        let key = match host.get_snapshot_key(&snapshot.public_data).await {
            Ok(key) => key,
            Err(err) => {
                self.fail(err);
                return false;
            }
        };
        let author_key_b64 = snapshot.public_data.pub_key.clone();
        if !host
            .is_valid_client(&author_key_b64)
            .await
            .unwrap_or(false)
        {
            self.fail(ErrorCode::SnapshotAuthorRejected.into());
            return false;
        }
        let author = match decode_public_key(&author_key_b64) {
            Ok(author) => author,
            Err(_) => {
                self.fail(ErrorCode::SnapshotSignatureInvalid.into());
                return false;
            }
        };

        // Re-delivery of the snapshot we already know: its proof must not
        // have changed.
        if let Some(known) = &self.config.known_snapshot_info {
            if snapshot.public_data.snapshot_id == known.snapshot_id
                && !proofs_match(
                    &snapshot.public_data.parent_snapshot_proof,
                    &known.parent_snapshot_proof,
                )
            {
                self.fail(ErrorCode::SnapshotProofMismatch.into());
                return false;
            }
        }

        let chain_info = self.chain_info_for(&snapshot);
        let params = SnapshotVerifyParams {
            current_doc_id: &self.config.document_id,
            parent_snapshot_ciphertext: chain_info.as_ref().map(|info| info.ciphertext.as_str()),
            grandparent_snapshot_proof: chain_info
                .as_ref()
                .map(|info| info.parent_snapshot_proof.as_str()),
            observed_update_clocks: chain_info.as_ref().map(|info| &info.update_clocks),
        };
        let plaintext = match verify_and_decrypt_snapshot(&snapshot, &key, &author, &params) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                self.fail(err);
                return false;
            }
        };
        if let Err(err) = host.apply_snapshot(plaintext).await {
            self.fail(err);
            return false;
        }

        // Changes that were in flight against the old snapshot must be
        // re-issued against the new one.
        let mut reanchored: Vec<Value> = Vec::new();
        for in_flight in self.context.updates_in_flight.drain(..) {
            reanchored.extend(in_flight.changes);
        }
        reanchored.extend(std::mem::take(&mut self.context.pending_changes_queue));
        self.context.pending_changes_queue = reanchored;

        self.context.active_snapshot_id = Some(snapshot.public_data.snapshot_id.clone());
        self.context.latest_server_version =
            snapshot.server_data.as_ref().map(|data| data.latest_version);
        self.context.document_key = Some(key);
        self.context.updates_local_clock = -1;
        self.context.snapshot_infos_with_update_clocks.push(SnapshotInfo {
            snapshot_id: snapshot.public_data.snapshot_id.clone(),
            ciphertext: snapshot.ciphertext.clone(),
            parent_snapshot_proof: snapshot.public_data.parent_snapshot_proof.clone(),
            update_clocks: BTreeMap::new(),
        });
        true
    }

    /// Verify, decrypt, and apply one update from the server.
    async fn apply_server_update<H: SyncHost>(
        &mut self,
        update: Update,
        host: &H,
        source: UpdateSource,
    ) -> UpdateApplyOutcome {
        let author_key_b64 = update.public_data.pub_key.clone();
        let tuple = (
            update.public_data.ref_snapshot_id.clone(),
            author_key_b64.clone(),
            update.public_data.clock,
        );
        if let Some(seen_ciphertext) = self.context.observed_update_fingerprints.get(&tuple) {
            // Same (snapshot, author, clock) seen before. On the broadcast
            // path that is a replay either way; on the recovery path only
            // a differing ciphertext is.
            if source == UpdateSource::Broadcast || *seen_ciphertext != update.ciphertext {
                self.fail(ErrorCode::UpdateClockMismatch.into());
                return UpdateApplyOutcome::Failed;
            }
            return UpdateApplyOutcome::Ignored;
        }

        let Some(key) = self.context.document_key else {
            self.fail(SecsyncError::invalid("update received before document"));
            return UpdateApplyOutcome::Failed;
        };
        let author = match decode_public_key(&author_key_b64) {
            Ok(author) => author,
            Err(_) => {
                self.fail(ErrorCode::UpdateIntegrityFailed.into());
                return UpdateApplyOutcome::Failed;
            }
        };
        let active_snapshot_id = self.context.active_snapshot_id.clone().unwrap_or_default();
        let params = UpdateVerifyParams {
            current_active_snapshot_id: &active_snapshot_id,
            current_clock: self.context.author_clock(&author_key_b64),
            skip_if_current_clock_is_higher: source != UpdateSource::DocumentLoad,
            authored_by_current_client: source != UpdateSource::DocumentLoad
                && author_key_b64 == self.own_public_key,
        };

        match verify_and_decrypt_update(&update, &key, &author, &params) {
            Ok(UpdateVerification::Applied { content, clock }) => {
                let changes = match host.deserialize_changes(&content) {
                    Ok(changes) => changes,
                    Err(err) => {
                        self.fail(err);
                        return UpdateApplyOutcome::Failed;
                    }
                };
                if let Err(err) = host.apply_changes(changes).await {
                    self.fail(err);
                    return UpdateApplyOutcome::Failed;
                }
                self.context
                    .observed_update_fingerprints
                    .insert(tuple, update.ciphertext.clone());
                if let Some(info) = self.context.active_snapshot_info_mut() {
                    info.update_clocks.insert(author_key_b64, clock);
                }
                if let Some(version) = update.server_data.as_ref().map(|data| data.version) {
                    self.context.latest_server_version = Some(version);
                }
                UpdateApplyOutcome::Applied
            }
            Ok(UpdateVerification::Ignored) => UpdateApplyOutcome::Ignored,
            Err(err) => {
                self.fail(err);
                UpdateApplyOutcome::Failed
            }
        }
    }

    /// Bundle pending changes into one update and send it, unless a
    /// snapshot is in flight or no snapshot is active yet.
    async fn maybe_send_update<H: SyncHost>(&mut self, host: &H, effects: &mut Vec<SyncEffect>) {
        if self.state != SyncState::Connected
            || self.context.pending_changes_queue.is_empty()
            || self.context.snapshot_in_flight.is_some()
        {
            return;
        }
        let Some(active_snapshot_id) = self.context.active_snapshot_id.clone() else {
            return;
        };
        let Some(key) = self.context.document_key else {
            return;
        };

        let changes = std::mem::take(&mut self.context.pending_changes_queue);
        let content = match host.serialize_changes(&changes) {
            Ok(content) => content,
            Err(err) => {
                self.fail(err);
                return;
            }
        };
        let clock = (self.context.updates_local_clock + 1) as u64;
        let public_data = UpdatePublicData {
            ref_snapshot_id: active_snapshot_id,
            doc_id: self.config.document_id.clone(),
            pub_key: self.own_public_key.clone(),
            clock,
        };
        match create_update(
            &content,
            public_data,
            &key,
            self.config.signature_key_pair.signing_key(),
            clock,
            &mut self.rng,
        ) {
            Ok(envelope) => {
                self.context.updates_local_clock = clock as i64;
                self.context.updates_in_flight.push(UpdateInFlight {
                    clock,
                    envelope: envelope.clone(),
                    changes,
                });
                effects.push(SyncEffect::SendFrame(Box::new(ClientFrame::Update(
                    envelope,
                ))));
            }
            Err(err) => self.fail(err),
        }
    }

    /// Create and send a fresh snapshot from host-provided state.
    async fn initiate_snapshot<H: SyncHost>(&mut self, host: &H, effects: &mut Vec<SyncEffect>) {
        if self.state != SyncState::Connected || self.context.snapshot_in_flight.is_some() {
            return;
        }
        let new_data = match host.get_new_snapshot_data(&self.config.document_id).await {
            Ok(data) => data,
            Err(err) => {
                self.fail(err);
                return;
            }
        };

        let (parent_id, parent_ciphertext, grandparent_proof, parent_clocks) =
            match self.context.active_snapshot_info() {
                Some(info) => (
                    info.snapshot_id.clone(),
                    info.ciphertext.clone(),
                    info.parent_snapshot_proof.clone(),
                    info.update_clocks.clone(),
                ),
                None => Default::default(),
            };
        let public_data = SnapshotPublicData {
            snapshot_id: new_data.id.clone(),
            doc_id: self.config.document_id.clone(),
            pub_key: self.own_public_key.clone(),
            parent_snapshot_id: parent_id,
            parent_snapshot_proof: String::new(),
            parent_snapshot_update_clocks: parent_clocks,
            extra: new_data.public_data.clone(),
        };
        match create_snapshot(
            &new_data.data,
            public_data,
            &new_data.key,
            self.config.signature_key_pair.signing_key(),
            &parent_ciphertext,
            &grandparent_proof,
            &mut self.rng,
        ) {
            Ok(snapshot) => {
                self.context.snapshot_in_flight = Some(SnapshotInFlight {
                    snapshot_id: new_data.id,
                    ciphertext: snapshot.ciphertext.clone(),
                    parent_snapshot_proof: snapshot.public_data.parent_snapshot_proof.clone(),
                    update_clocks: BTreeMap::new(),
                });
                self.context.document_key = Some(new_data.key);
                // The snapshot content already contains these changes.
                self.context.pending_changes_queue.clear();
                effects.push(SyncEffect::SendFrame(Box::new(ClientFrame::Snapshot(
                    snapshot,
                ))));
            }
            Err(err) => self.fail(err),
        }
    }

    async fn handle_snapshot_saved<H: SyncHost>(
        &mut self,
        snapshot_id: String,
        host: &H,
        effects: &mut Vec<SyncEffect>,
    ) {
        let Some(in_flight) = self.context.snapshot_in_flight.take() else {
            warn!(snapshot_id = %snapshot_id, "snapshot ack without snapshot in flight");
            return;
        };
        if in_flight.snapshot_id != snapshot_id {
            warn!(snapshot_id = %snapshot_id, "snapshot ack for unknown snapshot");
            return;
        }
        self.context.active_snapshot_id = Some(in_flight.snapshot_id.clone());
        self.context.latest_server_version = None;
        self.context.updates_local_clock = -1;
        self.context.updates_in_flight.clear();
        self.context.snapshot_infos_with_update_clocks.push(SnapshotInfo {
            snapshot_id: in_flight.snapshot_id,
            ciphertext: in_flight.ciphertext,
            parent_snapshot_proof: in_flight.parent_snapshot_proof,
            update_clocks: BTreeMap::new(),
        });
        self.maybe_send_update(host, effects).await;
    }

    /// The server rejected our snapshot. Apply whatever catch-up payload
    /// it attached, drop pending changes (the next snapshot re-includes
    /// them), and retry.
    async fn handle_snapshot_save_failed<H: SyncHost>(
        &mut self,
        snapshot: Option<Snapshot>,
        updates: Option<Vec<Update>>,
        host: &H,
        effects: &mut Vec<SyncEffect>,
    ) {
        self.context.snapshot_in_flight = None;
        if let Some(snapshot) = snapshot {
            if !self.apply_server_snapshot(snapshot, host).await {
                return;
            }
        }
        if let Some(updates) = updates {
            for update in updates {
                if self
                    .apply_server_update(update, host, UpdateSource::Recovery)
                    .await
                    == UpdateApplyOutcome::Failed
                {
                    return;
                }
            }
        }
        self.context.pending_changes_queue.clear();
        self.initiate_snapshot(host, effects).await;
    }

    fn handle_update_saved(&mut self, snapshot_id: &str, clock: u64, server_version: u64) {
        if self.context.active_snapshot_id.as_deref() != Some(snapshot_id) {
            return;
        }
        self.context.updates_in_flight.retain(|u| u.clock != clock);
        self.context.latest_server_version = Some(server_version);
        let own_public_key = self.own_public_key.clone();
        if let Some(info) = self.context.active_snapshot_info_mut() {
            let entry = info.update_clocks.entry(own_public_key).or_insert(clock);
            *entry = (*entry).max(clock);
        }
    }

    /// Resubmit with the same clock; the server identifies updates by
    /// `(refSnapshotId, pubKey, clock)`.
    fn handle_update_save_failed(
        &mut self,
        snapshot_id: &str,
        clock: u64,
        effects: &mut Vec<SyncEffect>,
    ) {
        if self.context.active_snapshot_id.as_deref() != Some(snapshot_id) {
            return;
        }
        if let Some(in_flight) = self
            .context
            .updates_in_flight
            .iter()
            .find(|u| u.clock == clock)
        {
            effects.push(SyncEffect::SendFrame(Box::new(ClientFrame::Update(
                in_flight.envelope.clone(),
            ))));
        }
    }

    /// Announce the fresh ephemeral session to peers.
    async fn send_session_initialize<H: SyncHost>(
        &mut self,
        host: &H,
        effects: &mut Vec<SyncEffect>,
    ) {
        self.send_ephemeral_message(&[], EphemeralMessageType::Initialize, host, effects)
            .await;
    }

    async fn send_ephemeral_message<H: SyncHost>(
        &mut self,
        body: &[u8],
        message_type: EphemeralMessageType,
        host: &H,
        effects: &mut Vec<SyncEffect>,
    ) {
        let key = match host.get_ephemeral_message_key().await {
            Ok(key) => key,
            Err(err) => {
                self.context.creating_ephemeral_errors.push(err);
                return;
            }
        };
        match create_ephemeral_message(
            body,
            message_type,
            &mut self.context.ephemeral_session,
            &self.config.document_id,
            &key,
            &self.config.signature_key_pair,
            &mut self.rng,
        ) {
            Ok(message) => {
                effects.push(SyncEffect::SendFrame(Box::new(
                    ClientFrame::EphemeralMessage(message),
                )));
            }
            Err(err) => self.context.creating_ephemeral_errors.push(err),
        }
    }

    async fn handle_ephemeral_message<H: SyncHost>(
        &mut self,
        message: EphemeralMessage,
        host: &H,
        effects: &mut Vec<SyncEffect>,
    ) {
        let key = match host.get_ephemeral_message_key().await {
            Ok(key) => key,
            Err(err) => {
                self.context.receiving_ephemeral_errors.push(err);
                return;
            }
        };
        let author_key_b64 = message.public_data.pub_key.clone();
        if !host
            .is_valid_client(&author_key_b64)
            .await
            .unwrap_or(false)
        {
            self.context
                .receiving_ephemeral_errors
                .push(ErrorCode::EphemeralAuthorRejected.into());
            return;
        }
        let author = match decode_public_key(&author_key_b64) {
            Ok(author) => author,
            Err(_) => {
                self.context
                    .receiving_ephemeral_errors
                    .push(ErrorCode::EphemeralSignatureInvalid.into());
                return;
            }
        };

        match verify_and_decrypt_ephemeral_message(
            &message,
            &key,
            &mut self.context.ephemeral_session,
            &author,
            &self.config.document_id,
            &self.config.signature_key_pair,
            &mut self.rng,
        ) {
            Ok(outcome) => {
                if let Some(code) = outcome.error {
                    self.context.receiving_ephemeral_errors.push(code.into());
                }
                if let Some(reply) = outcome.reply {
                    effects.push(SyncEffect::SendFrame(Box::new(
                        ClientFrame::EphemeralMessage(reply),
                    )));
                }
                if let Some(content) = outcome.content {
                    if let Err(err) = host.apply_ephemeral_message(content, &author_key_b64).await
                    {
                        warn!(error = %err, "host failed to apply ephemeral message");
                        self.context
                            .receiving_ephemeral_errors
                            .push(ErrorCode::EphemeralUnexpected.into());
                    }
                }
            }
            Err(err) => {
                self.context.receiving_ephemeral_errors.push(err);
            }
        }
    }
}
