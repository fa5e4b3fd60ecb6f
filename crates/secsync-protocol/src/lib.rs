//! Secsync message codecs and wire formats.
//!
//! This crate turns plaintext document state, incremental changes, and
//! presence payloads into authenticated-encrypted wire envelopes and back:
//!
//! - [`snapshot`]: full-state checkpoints chained by parent proofs
//! - [`update`]: per-author clocked incremental changes
//! - [`ephemeral`] / [`session`]: unpersisted awareness messages with a
//!   proof-based session handshake and replay protection
//! - [`wire`]: the JSON frame types exchanged over the socket
//!
//! All codecs are pure: callers supply keys, randomness, and local
//! knowledge (active snapshot id, observed clocks); nothing here does I/O.

pub mod ephemeral;
pub mod session;
pub mod snapshot;
pub mod update;
pub mod wire;

pub use ephemeral::{
    create_ephemeral_message, verify_and_decrypt_ephemeral_message, EphemeralMessageType,
    EphemeralOutcome,
};
pub use session::{EphemeralSession, PeerSession};
pub use snapshot::{create_snapshot, verify_and_decrypt_snapshot, SnapshotVerifyParams};
pub use update::{create_update, verify_and_decrypt_update, UpdateVerification, UpdateVerifyParams};
pub use wire::{
    parse_server_frame, serialize_client_frame, serialize_server_frame, ClientFrame, DocumentFrame,
    EphemeralMessage, EphemeralPublicData, ParsedFrame, ServerFrame, Snapshot, SnapshotPublicData,
    SnapshotServerData, Update, UpdatePublicData, UpdateServerData,
};
