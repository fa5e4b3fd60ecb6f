//! Secsync client.
//!
//! The sync state machine plus the pieces that drive it: a websocket
//! transport actor, the host callback surface, explicit configuration,
//! and the per-connection context with its bounded error accounting.
//!
//! Hosts implement [`SyncHost`] to plug in their CRDT and key
//! distribution, then either spawn a full client with
//! [`SyncClient::connect`] or drive a [`SyncMachine`] directly with
//! events (useful for tests and custom transports).

pub mod config;
pub mod context;
pub mod event;
pub mod host;
pub mod machine;
pub mod ring;
pub mod runtime;
pub mod transport;

pub use config::{KnownSnapshotInfo, LoggingMode, SyncConfig};
pub use context::{
    DocumentDecryptionState, SnapshotInFlight, SnapshotInfo, SyncContext, UpdateInFlight,
};
pub use event::{SyncEffect, SyncEvent};
pub use host::{NewSnapshotData, SyncHost};
pub use machine::{SyncMachine, SyncState};
pub use ring::ErrorRing;
pub use runtime::SyncClient;
