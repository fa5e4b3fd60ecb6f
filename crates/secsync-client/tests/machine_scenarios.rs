//! Sync machine scenarios driven through the public event interface.

use async_trait::async_trait;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use secsync_client::{
    DocumentDecryptionState, LoggingMode, NewSnapshotData, SyncConfig, SyncEffect, SyncEvent,
    SyncHost, SyncMachine, SyncState,
};
use secsync_core::{ErrorCode, Result, SecsyncError, SigningKeyPair, SymmetricKey};
use secsync_protocol::ephemeral::{
    create_ephemeral_message, verify_and_decrypt_ephemeral_message, EphemeralMessageType,
};
use secsync_protocol::session::EphemeralSession;
use secsync_protocol::snapshot::create_snapshot;
use secsync_protocol::update::create_update;
use secsync_protocol::wire::{
    ClientFrame, DocumentFrame, EphemeralMessage, ServerFrame, Snapshot, SnapshotPublicData,
    Update, UpdatePublicData,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;

const DOC_KEY: SymmetricKey = [41u8; 32];
const EPHEMERAL_KEY: SymmetricKey = [42u8; 32];
const DOC_ID: &str = "doc-1";

#[derive(Default)]
struct TestHost {
    create_initial_snapshot: bool,
    applied_snapshots: Mutex<Vec<Vec<u8>>>,
    applied_changes: Mutex<Vec<Value>>,
    applied_ephemeral: Mutex<Vec<(Vec<u8>, String)>>,
    next_snapshot_ids: Mutex<Vec<String>>,
}

impl TestHost {
    fn with_snapshot_ids(ids: &[&str]) -> Self {
        Self {
            next_snapshot_ids: Mutex::new(ids.iter().rev().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    fn applied_changes(&self) -> Vec<Value> {
        self.applied_changes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncHost for TestHost {
    async fn get_snapshot_key(&self, _public_data: &SnapshotPublicData) -> Result<SymmetricKey> {
        Ok(DOC_KEY)
    }

    async fn get_new_snapshot_data(&self, _document_id: &str) -> Result<NewSnapshotData> {
        let id = self
            .next_snapshot_ids
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| "generated-snapshot".to_string());
        Ok(NewSnapshotData {
            data: b"serialized crdt state".to_vec(),
            id,
            key: DOC_KEY,
            public_data: BTreeMap::new(),
        })
    }

    async fn get_ephemeral_message_key(&self) -> Result<SymmetricKey> {
        Ok(EPHEMERAL_KEY)
    }

    async fn should_create_new_snapshot(&self, _document: &DocumentFrame) -> bool {
        self.create_initial_snapshot
    }

    async fn apply_snapshot(&self, plaintext: Vec<u8>) -> Result<()> {
        self.applied_snapshots.lock().unwrap().push(plaintext);
        Ok(())
    }

    async fn apply_changes(&self, changes: Vec<Value>) -> Result<()> {
        self.applied_changes.lock().unwrap().extend(changes);
        Ok(())
    }

    async fn apply_ephemeral_message(
        &self,
        payload: Vec<u8>,
        author_public_key: &str,
    ) -> Result<()> {
        self.applied_ephemeral
            .lock()
            .unwrap()
            .push((payload, author_public_key.to_string()));
        Ok(())
    }

    async fn is_valid_client(&self, _public_key: &str) -> Result<bool> {
        Ok(true)
    }

    fn serialize_changes(&self, changes: &[Value]) -> Result<Vec<u8>> {
        serde_json::to_vec(changes).map_err(|e| SecsyncError::serialization(e.to_string()))
    }

    fn deserialize_changes(&self, payload: &[u8]) -> Result<Vec<Value>> {
        serde_json::from_slice(payload).map_err(|e| SecsyncError::serialization(e.to_string()))
    }
}

fn config(pair: &SigningKeyPair) -> SyncConfig {
    SyncConfig {
        document_id: DOC_ID.into(),
        websocket_host: "wss://example.com".into(),
        websocket_session_key: "session-key".into(),
        signature_key_pair: pair.clone(),
        logging: LoggingMode::Off,
        known_snapshot_info: None,
    }
}

fn machine(pair: &SigningKeyPair, seed: u64) -> SyncMachine<ChaCha20Rng> {
    SyncMachine::new(config(pair), ChaCha20Rng::seed_from_u64(seed))
}

fn remote_snapshot(
    author: &SigningKeyPair,
    snapshot_id: &str,
    rng: &mut ChaCha20Rng,
) -> Snapshot {
    let public_data = SnapshotPublicData {
        snapshot_id: snapshot_id.into(),
        doc_id: DOC_ID.into(),
        pub_key: author.public_key_base64(),
        parent_snapshot_id: String::new(),
        parent_snapshot_proof: String::new(),
        parent_snapshot_update_clocks: BTreeMap::new(),
        extra: BTreeMap::new(),
    };
    create_snapshot(
        b"remote document state",
        public_data,
        &DOC_KEY,
        author.signing_key(),
        "",
        "",
        rng,
    )
    .unwrap()
}

fn remote_update(
    author: &SigningKeyPair,
    snapshot_id: &str,
    clock: u64,
    change: Value,
    rng: &mut ChaCha20Rng,
) -> Update {
    let content = serde_json::to_vec(&vec![change]).unwrap();
    let public_data = UpdatePublicData {
        ref_snapshot_id: snapshot_id.into(),
        doc_id: DOC_ID.into(),
        pub_key: author.public_key_base64(),
        clock,
    };
    create_update(&content, public_data, &DOC_KEY, author.signing_key(), clock, rng).unwrap()
}

fn incoming(frame: ServerFrame) -> SyncEvent {
    SyncEvent::WebsocketAddToIncomingQueue(Box::new(frame))
}

fn sent_frames(effects: &[SyncEffect]) -> Vec<&ClientFrame> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            SyncEffect::SendFrame(frame) => Some(frame.as_ref()),
            SyncEffect::CloseConnection => None,
        })
        .collect()
}

fn sent_update(effects: &[SyncEffect]) -> Option<&Update> {
    sent_frames(effects).into_iter().find_map(|frame| match frame {
        ClientFrame::Update(update) => Some(update),
        _ => None,
    })
}

fn sent_snapshot(effects: &[SyncEffect]) -> Option<&Snapshot> {
    sent_frames(effects).into_iter().find_map(|frame| match frame {
        ClientFrame::Snapshot(snapshot) => Some(snapshot),
        _ => None,
    })
}

fn sent_ephemeral(effects: &[SyncEffect]) -> Option<&EphemeralMessage> {
    sent_frames(effects).into_iter().find_map(|frame| match frame {
        ClientFrame::EphemeralMessage(message) => Some(message),
        _ => None,
    })
}

#[tokio::test]
async fn document_load_applies_snapshot_and_updates_in_order() {
    let mut rng = ChaCha20Rng::seed_from_u64(100);
    let remote = SigningKeyPair::generate(&mut rng);
    let own = SigningKeyPair::generate(&mut rng);
    let host = TestHost::default();
    let mut machine = machine(&own, 1);

    machine.handle_event(SyncEvent::WebsocketConnected, &host).await;
    let snapshot = remote_snapshot(&remote, "snap-1", &mut rng);
    let updates = vec![
        remote_update(&remote, "snap-1", 0, json!({"op": "a"}), &mut rng),
        remote_update(&remote, "snap-1", 1, json!({"op": "b"}), &mut rng),
    ];
    let effects = machine
        .handle_event(
            incoming(ServerFrame::Document(DocumentFrame {
                snapshot: Some(snapshot),
                updates,
            })),
            &host,
        )
        .await;

    assert_eq!(machine.state(), SyncState::Connected);
    assert_eq!(
        machine.context().document_decryption_state,
        DocumentDecryptionState::Complete
    );
    assert_eq!(
        machine.context().active_snapshot_id.as_deref(),
        Some("snap-1")
    );
    assert_eq!(
        host.applied_snapshots.lock().unwrap().as_slice(),
        &[b"remote document state".to_vec()]
    );
    assert_eq!(host.applied_changes(), vec![json!({"op": "a"}), json!({"op": "b"})]);
    // The fresh session is announced after load.
    assert!(sent_ephemeral(&effects).is_some());
}

#[tokio::test]
async fn document_load_stops_at_bad_update_with_partial_state() {
    let mut rng = ChaCha20Rng::seed_from_u64(101);
    let remote = SigningKeyPair::generate(&mut rng);
    let own = SigningKeyPair::generate(&mut rng);
    let host = TestHost::default();
    let mut machine = machine(&own, 2);

    machine.handle_event(SyncEvent::WebsocketConnected, &host).await;
    let snapshot = remote_snapshot(&remote, "snap-1", &mut rng);
    let updates = vec![
        remote_update(&remote, "snap-1", 0, json!({"op": "good"}), &mut rng),
        remote_update(&remote, "snap-1", 1000, json!({"op": "gap"}), &mut rng),
    ];
    machine
        .handle_event(
            incoming(ServerFrame::Document(DocumentFrame {
                snapshot: Some(snapshot),
                updates,
            })),
            &host,
        )
        .await;

    assert_eq!(machine.state(), SyncState::Failed);
    assert_eq!(
        machine.context().document_decryption_state,
        DocumentDecryptionState::Partial
    );
    // The first update was applied, the gapped one was not.
    assert_eq!(host.applied_changes(), vec![json!({"op": "good"})]);
    assert_eq!(
        machine.last_error().and_then(SecsyncError::code),
        Some(ErrorCode::UpdateClockMismatch)
    );
}

#[tokio::test]
async fn local_changes_produce_gapless_clocks() {
    let mut rng = ChaCha20Rng::seed_from_u64(102);
    let remote = SigningKeyPair::generate(&mut rng);
    let own = SigningKeyPair::generate(&mut rng);
    let host = TestHost::default();
    let mut machine = machine(&own, 3);

    machine.handle_event(SyncEvent::WebsocketConnected, &host).await;
    let snapshot = remote_snapshot(&remote, "snap-1", &mut rng);
    machine
        .handle_event(
            incoming(ServerFrame::Document(DocumentFrame {
                snapshot: Some(snapshot),
                updates: vec![],
            })),
            &host,
        )
        .await;

    let first = machine
        .handle_event(SyncEvent::AddChanges(vec![json!({"op": 1})]), &host)
        .await;
    let second = machine
        .handle_event(SyncEvent::AddChanges(vec![json!({"op": 2})]), &host)
        .await;

    let first = sent_update(&first).unwrap();
    let second = sent_update(&second).unwrap();
    assert_eq!(first.public_data.clock, 0);
    assert_eq!(second.public_data.clock, 1);
    assert_eq!(first.public_data.ref_snapshot_id, "snap-1");
    assert_eq!(machine.context().updates_in_flight.len(), 2);
}

#[tokio::test]
async fn update_save_failed_resubmits_the_same_envelope() {
    let mut rng = ChaCha20Rng::seed_from_u64(103);
    let remote = SigningKeyPair::generate(&mut rng);
    let own = SigningKeyPair::generate(&mut rng);
    let host = TestHost::default();
    let mut machine = machine(&own, 4);

    machine.handle_event(SyncEvent::WebsocketConnected, &host).await;
    machine
        .handle_event(
            incoming(ServerFrame::Document(DocumentFrame {
                snapshot: Some(remote_snapshot(&remote, "snap-1", &mut rng)),
                updates: vec![],
            })),
            &host,
        )
        .await;
    let effects = machine
        .handle_event(SyncEvent::AddChanges(vec![json!({"op": 1})]), &host)
        .await;
    let original = sent_update(&effects).unwrap().clone();

    let effects = machine
        .handle_event(
            incoming(ServerFrame::UpdateSaveFailed {
                doc_id: DOC_ID.into(),
                snapshot_id: "snap-1".into(),
                clock: 0,
            }),
            &host,
        )
        .await;
    let resent = sent_update(&effects).unwrap();
    assert_eq!(*resent, original);

    // Once saved, the in-flight entry is gone and the version recorded.
    machine
        .handle_event(
            incoming(ServerFrame::UpdateSaved {
                doc_id: DOC_ID.into(),
                snapshot_id: "snap-1".into(),
                clock: 0,
                server_version: 7,
            }),
            &host,
        )
        .await;
    assert!(machine.context().updates_in_flight.is_empty());
    assert_eq!(machine.context().latest_server_version, Some(7));
}

#[tokio::test]
async fn changes_are_deferred_while_a_snapshot_is_in_flight() {
    let mut rng = ChaCha20Rng::seed_from_u64(104);
    let remote = SigningKeyPair::generate(&mut rng);
    let own = SigningKeyPair::generate(&mut rng);
    let host = TestHost::with_snapshot_ids(&["snap-2"]);
    let mut machine = machine(&own, 5);

    machine.handle_event(SyncEvent::WebsocketConnected, &host).await;
    machine
        .handle_event(
            incoming(ServerFrame::Document(DocumentFrame {
                snapshot: Some(remote_snapshot(&remote, "snap-1", &mut rng)),
                updates: vec![],
            })),
            &host,
        )
        .await;

    let effects = machine.handle_event(SyncEvent::CreateSnapshot, &host).await;
    let snapshot = sent_snapshot(&effects).unwrap();
    assert_eq!(snapshot.public_data.snapshot_id, "snap-2");
    assert_eq!(snapshot.public_data.parent_snapshot_id, "snap-1");
    assert!(machine.context().snapshot_in_flight.is_some());

    // New changes queue up instead of going out.
    let effects = machine
        .handle_event(SyncEvent::AddChanges(vec![json!({"op": "deferred"})]), &host)
        .await;
    assert!(sent_update(&effects).is_none());
    assert_eq!(machine.context().pending_changes_queue.len(), 1);

    // Confirmation flushes them against the new snapshot with a fresh clock.
    let effects = machine
        .handle_event(
            incoming(ServerFrame::SnapshotSaved {
                snapshot_id: "snap-2".into(),
                doc_id: DOC_ID.into(),
            }),
            &host,
        )
        .await;
    let update = sent_update(&effects).unwrap();
    assert_eq!(update.public_data.ref_snapshot_id, "snap-2");
    assert_eq!(update.public_data.clock, 0);
    assert_eq!(
        machine.context().active_snapshot_id.as_deref(),
        Some("snap-2")
    );
}

#[tokio::test]
async fn snapshot_save_failed_applies_missed_updates_and_retries() {
    let mut rng = ChaCha20Rng::seed_from_u64(105);
    let remote = SigningKeyPair::generate(&mut rng);
    let own = SigningKeyPair::generate(&mut rng);
    let host = TestHost::with_snapshot_ids(&["snap-2", "snap-3"]);
    let mut machine = machine(&own, 6);

    machine.handle_event(SyncEvent::WebsocketConnected, &host).await;
    machine
        .handle_event(
            incoming(ServerFrame::Document(DocumentFrame {
                snapshot: Some(remote_snapshot(&remote, "snap-1", &mut rng)),
                updates: vec![],
            })),
            &host,
        )
        .await;
    machine.handle_event(SyncEvent::CreateSnapshot, &host).await;
    machine
        .handle_event(SyncEvent::AddChanges(vec![json!({"op": "pending"})]), &host)
        .await;

    // The server rejects snap-2: it missed a remote update.
    let missed = remote_update(&remote, "snap-1", 0, json!({"op": "missed"}), &mut rng);
    let effects = machine
        .handle_event(
            incoming(ServerFrame::SnapshotSaveFailed {
                doc_id: DOC_ID.into(),
                snapshot: None,
                updates: Some(vec![missed]),
            }),
            &host,
        )
        .await;

    // The missed update was applied locally.
    assert_eq!(host.applied_changes(), vec![json!({"op": "missed"})]);
    // Pending changes were dropped; the retry snapshot re-includes them.
    assert!(machine.context().pending_changes_queue.is_empty());
    // A new snapshot went out, now recording the remote author's clock.
    let retry = sent_snapshot(&effects).unwrap();
    assert_eq!(retry.public_data.snapshot_id, "snap-3");
    assert_eq!(
        retry
            .public_data
            .parent_snapshot_update_clocks
            .get(&remote.public_key_base64()),
        Some(&0)
    );
    let in_flight = machine.context().snapshot_in_flight.as_ref().unwrap();
    assert_eq!(in_flight.snapshot_id, "snap-3");
}

#[tokio::test]
async fn reconnect_resets_the_per_connection_context() {
    let mut rng = ChaCha20Rng::seed_from_u64(106);
    let remote = SigningKeyPair::generate(&mut rng);
    let own = SigningKeyPair::generate(&mut rng);
    let host = TestHost::default();
    let mut machine = machine(&own, 7);

    machine.handle_event(SyncEvent::WebsocketConnected, &host).await;
    machine
        .handle_event(
            incoming(ServerFrame::Document(DocumentFrame {
                snapshot: Some(remote_snapshot(&remote, "snap-1", &mut rng)),
                updates: vec![],
            })),
            &host,
        )
        .await;
    machine
        .handle_event(SyncEvent::AddChanges(vec![json!({"op": 1})]), &host)
        .await;
    let old_session = machine.context().ephemeral_session.id.clone();

    machine
        .handle_event(SyncEvent::WebsocketDisconnected, &host)
        .await;
    assert_eq!(machine.state(), SyncState::Connecting { retrying: true });
    // Changes made while offline queue up.
    machine
        .handle_event(SyncEvent::AddChanges(vec![json!({"op": "offline"})]), &host)
        .await;

    machine.handle_event(SyncEvent::WebsocketConnected, &host).await;
    let context = machine.context();
    assert_eq!(context.active_snapshot_id, None);
    assert_eq!(
        context.document_decryption_state,
        DocumentDecryptionState::Pending
    );
    assert_eq!(context.updates_local_clock, -1);
    assert!(context.updates_in_flight.is_empty());
    assert!(context.snapshot_infos_with_update_clocks.is_empty());
    assert_ne!(context.ephemeral_session.id, old_session);
    assert_eq!(context.pending_changes_queue, vec![json!({"op": "offline"})]);
}

#[tokio::test]
async fn replayed_update_tuple_is_rejected() {
    let mut rng = ChaCha20Rng::seed_from_u64(107);
    let remote = SigningKeyPair::generate(&mut rng);
    let own = SigningKeyPair::generate(&mut rng);
    let host = TestHost::default();
    let mut machine = machine(&own, 8);

    machine.handle_event(SyncEvent::WebsocketConnected, &host).await;
    machine
        .handle_event(
            incoming(ServerFrame::Document(DocumentFrame {
                snapshot: Some(remote_snapshot(&remote, "snap-1", &mut rng)),
                updates: vec![],
            })),
            &host,
        )
        .await;

    let update = remote_update(&remote, "snap-1", 0, json!({"op": 1}), &mut rng);
    machine
        .handle_event(incoming(ServerFrame::Update(update.clone())), &host)
        .await;
    assert_eq!(machine.state(), SyncState::Connected);
    assert_eq!(host.applied_changes().len(), 1);

    machine
        .handle_event(incoming(ServerFrame::Update(update)), &host)
        .await;
    assert_eq!(machine.state(), SyncState::Failed);
    assert_eq!(
        machine.last_error().and_then(SecsyncError::code),
        Some(ErrorCode::UpdateClockMismatch)
    );
    assert_eq!(host.applied_changes().len(), 1);
}

#[tokio::test]
async fn terminal_server_frames_fail_the_machine() {
    let own = SigningKeyPair::generate(&mut ChaCha20Rng::seed_from_u64(108));
    let host = TestHost::default();
    let mut machine = machine(&own, 9);

    machine.handle_event(SyncEvent::WebsocketConnected, &host).await;
    machine
        .handle_event(incoming(ServerFrame::Unauthorized), &host)
        .await;
    assert_eq!(machine.state(), SyncState::Failed);
}

/// Replay protection end to end: a peer proves its session, sends one
/// payload, then replays the exact same envelope.
#[tokio::test]
async fn ephemeral_replay_is_surfaced_once_and_applied_once() {
    let mut rng = ChaCha20Rng::seed_from_u64(109);
    let own = SigningKeyPair::generate(&mut rng);
    let peer_pair = SigningKeyPair::generate(&mut rng);
    let mut peer_session = EphemeralSession::new(&mut rng);
    let host = TestHost::default();
    let mut machine = machine(&own, 10);

    machine.handle_event(SyncEvent::WebsocketConnected, &host).await;
    // An empty document load announces the machine's session.
    let effects = machine
        .handle_event(
            incoming(ServerFrame::Document(DocumentFrame::default())),
            &host,
        )
        .await;
    let initialize = sent_ephemeral(&effects).unwrap().clone();

    // The peer answers the announcement with a proof of its own session.
    let outcome = verify_and_decrypt_ephemeral_message(
        &initialize,
        &EPHEMERAL_KEY,
        &mut peer_session,
        &own.verifying_key(),
        DOC_ID,
        &peer_pair,
        &mut rng,
    )
    .unwrap();
    let proof = outcome.reply.unwrap();
    let effects = machine
        .handle_event(incoming(ServerFrame::EphemeralMessage(proof)), &host)
        .await;
    // The proof requested one back; the machine obliges.
    let counter_proof = sent_ephemeral(&effects).unwrap().clone();
    verify_and_decrypt_ephemeral_message(
        &counter_proof,
        &EPHEMERAL_KEY,
        &mut peer_session,
        &own.verifying_key(),
        DOC_ID,
        &peer_pair,
        &mut rng,
    )
    .unwrap();

    // Payload [22], then the exact same envelope again.
    let message = create_ephemeral_message(
        &[22],
        EphemeralMessageType::Message,
        &mut peer_session,
        DOC_ID,
        &EPHEMERAL_KEY,
        &peer_pair,
        &mut rng,
    )
    .unwrap();
    machine
        .handle_event(incoming(ServerFrame::EphemeralMessage(message.clone())), &host)
        .await;
    machine
        .handle_event(incoming(ServerFrame::EphemeralMessage(message)), &host)
        .await;

    let applied = host.applied_ephemeral.lock().unwrap().clone();
    assert_eq!(applied, vec![(vec![22], peer_pair.public_key_base64())]);
    let replays = machine
        .context()
        .receiving_ephemeral_errors
        .entries()
        .filter(|e| e.code() == Some(ErrorCode::EphemeralReplay))
        .count();
    assert_eq!(replays, 1);
    assert_eq!(machine.state(), SyncState::Connected);
}
