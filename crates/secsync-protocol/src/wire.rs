//! Wire envelope and frame types.
//!
//! Every frame on the socket is a JSON object with a `type` discriminator.
//! Binary fields (nonces, ciphertexts, signatures, keys) are unpadded
//! base64url strings. Public data blocks are the exact structures whose
//! canonical JSON serves as AEAD associated data and signed payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Signed public metadata of a snapshot.
///
/// `parent_snapshot_update_clocks` records, per author public key, the
/// update clock the snapshot author had applied before taking the
/// snapshot. `extra` carries host-defined fields; they participate in the
/// canonical form like any other key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPublicData {
    pub snapshot_id: String,
    pub doc_id: String,
    pub pub_key: String,
    /// Empty string for the first snapshot of a document.
    #[serde(default)]
    pub parent_snapshot_id: String,
    /// Hash-chain commitment, filled in by the snapshot codec.
    #[serde(default)]
    pub parent_snapshot_proof: String,
    #[serde(default)]
    pub parent_snapshot_update_clocks: BTreeMap<String, u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Server-added snapshot delivery metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotServerData {
    pub latest_version: u64,
}

/// An authenticated-encrypted full-state checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub ciphertext: String,
    pub nonce: String,
    pub signature: String,
    pub public_data: SnapshotPublicData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_data: Option<SnapshotServerData>,
}

/// Signed public metadata of an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePublicData {
    pub ref_snapshot_id: String,
    pub doc_id: String,
    pub pub_key: String,
    /// Per-author monotonic counter starting at 0 against `ref_snapshot_id`.
    pub clock: u64,
}

/// Server-added update delivery metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServerData {
    pub version: u64,
}

/// An authenticated-encrypted incremental change anchored to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    pub ciphertext: String,
    pub nonce: String,
    pub signature: String,
    pub public_data: UpdatePublicData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_data: Option<UpdateServerData>,
}

/// Signed public metadata of an ephemeral message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralPublicData {
    pub doc_id: String,
    pub pub_key: String,
}

/// An authenticated-encrypted, unpersisted presence/awareness payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralMessage {
    pub ciphertext: String,
    pub nonce: String,
    pub signature: String,
    pub public_data: EphemeralPublicData,
}

/// Initial document delivery: the active snapshot (if any) plus its
/// updates in server version order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
    #[serde(default)]
    pub updates: Vec<Update>,
}

/// Frames the server sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    Document(DocumentFrame),
    Snapshot {
        snapshot: Snapshot,
    },
    #[serde(rename_all = "camelCase")]
    SnapshotSaved {
        snapshot_id: String,
        doc_id: String,
    },
    #[serde(rename_all = "camelCase")]
    SnapshotSaveFailed {
        doc_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<Snapshot>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updates: Option<Vec<Update>>,
    },
    Update(Update),
    #[serde(rename_all = "camelCase")]
    UpdateSaved {
        doc_id: String,
        snapshot_id: String,
        clock: u64,
        server_version: u64,
    },
    #[serde(rename_all = "camelCase")]
    UpdateSaveFailed {
        doc_id: String,
        snapshot_id: String,
        clock: u64,
    },
    EphemeralMessage(EphemeralMessage),
    DocumentNotFound,
    Unauthorized,
    DocumentError,
}

/// Frames clients send to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    Snapshot(Snapshot),
    Update(Update),
    EphemeralMessage(EphemeralMessage),
}

/// Result of parsing an incoming server frame.
#[derive(Debug, Clone)]
pub enum ParsedFrame {
    /// A frame the protocol understands.
    Known(Box<ServerFrame>),
    /// A JSON object with an unknown `type`, forwarded to the host.
    Custom(Value),
}

/// Parse a text frame from the socket.
///
/// Frames carrying a recognized `type` must deserialize fully; a malformed
/// known frame is an error, not a custom message.
pub fn parse_server_frame(text: &str) -> secsync_core::Result<ParsedFrame> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| secsync_core::SecsyncError::serialization(e.to_string()))?;
    let frame_type = value.get("type").and_then(Value::as_str).unwrap_or("");
    if KNOWN_FRAME_TYPES.contains(&frame_type) {
        let frame: ServerFrame = serde_json::from_value(value)
            .map_err(|e| secsync_core::SecsyncError::serialization(e.to_string()))?;
        Ok(ParsedFrame::Known(Box::new(frame)))
    } else {
        Ok(ParsedFrame::Custom(value))
    }
}

const KNOWN_FRAME_TYPES: &[&str] = &[
    "document",
    "snapshot",
    "snapshot-saved",
    "snapshot-save-failed",
    "update",
    "update-saved",
    "update-save-failed",
    "ephemeral-message",
    "document-not-found",
    "unauthorized",
    "document-error",
];

/// Serialize an outbound client frame.
pub fn serialize_client_frame(frame: &ClientFrame) -> secsync_core::Result<String> {
    serde_json::to_string(frame).map_err(|e| secsync_core::SecsyncError::serialization(e.to_string()))
}

/// Serialize an outbound server frame.
pub fn serialize_server_frame(frame: &ServerFrame) -> secsync_core::Result<String> {
    serde_json::to_string(frame).map_err(|e| secsync_core::SecsyncError::serialization(e.to_string()))
}
