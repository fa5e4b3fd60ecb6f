//! Host callback surface.
//!
//! Secsync is CRDT-agnostic: the host supplies key lookup, change
//! serialization, and apply callbacks. Callbacks may suspend; the sync
//! machine never begins the next event before the current one finishes.

use async_trait::async_trait;
use secsync_protocol::wire::{DocumentFrame, SnapshotPublicData};
use secsync_core::{Result, SymmetricKey};
use serde_json::Value;
use std::collections::BTreeMap;

/// Material for a snapshot this client is about to create.
#[derive(Debug, Clone)]
pub struct NewSnapshotData {
    /// Serialized full document state.
    pub data: Vec<u8>,
    /// Id for the new snapshot.
    pub id: String,
    /// Symmetric key the snapshot (and subsequent updates) encrypt under.
    pub key: SymmetricKey,
    /// Host-defined additional public data fields.
    pub public_data: BTreeMap<String, Value>,
}

/// Callbacks the host application provides to the sync machine.
#[async_trait]
pub trait SyncHost: Send + Sync {
    /// Key for decrypting a snapshot (and the updates anchored to it).
    async fn get_snapshot_key(&self, public_data: &SnapshotPublicData) -> Result<SymmetricKey>;

    /// Full state, id, key, and extra public data for a fresh snapshot.
    async fn get_new_snapshot_data(&self, document_id: &str) -> Result<NewSnapshotData>;

    /// Current key for ephemeral messages. May rotate between calls.
    async fn get_ephemeral_message_key(&self) -> Result<SymmetricKey>;

    /// Whether this client should author the initial snapshot for a
    /// document delivered without one.
    async fn should_create_new_snapshot(&self, document: &DocumentFrame) -> bool {
        let _ = document;
        false
    }

    /// Apply a decrypted snapshot to the local document state.
    async fn apply_snapshot(&self, plaintext: Vec<u8>) -> Result<()>;

    /// Apply decoded remote changes to the local document state.
    async fn apply_changes(&self, changes: Vec<Value>) -> Result<()>;

    /// Apply a decrypted ephemeral payload.
    async fn apply_ephemeral_message(&self, payload: Vec<u8>, author_public_key: &str)
        -> Result<()>;

    /// Whether the author key belongs to a legitimate collaborator.
    /// Errors are treated as `false`.
    async fn is_valid_client(&self, public_key: &str) -> Result<bool>;

    /// Encode a batch of local changes into one update payload.
    fn serialize_changes(&self, changes: &[Value]) -> Result<Vec<u8>>;

    /// Decode an update payload back into individual changes.
    fn deserialize_changes(&self, payload: &[u8]) -> Result<Vec<Value>>;

    /// A frame with an unrecognized `type` arrived.
    async fn handle_custom_message(&self, message: Value) -> Result<()> {
        let _ = message;
        Ok(())
    }
}
