//! Secsync server core.
//!
//! The server stores encrypted artifacts and relays them; it never holds
//! a decryption key. Three pieces: a per-document connection registry
//! ([`registry`]), a store enforcing snapshot-chain linkage and
//! per-author update clocks under a per-document transaction ([`store`]),
//! and the frame handler gluing them together ([`handler`]).

pub mod handler;
pub mod registry;
pub mod store;

pub use handler::{DocumentHandler, ServerConfig};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use store::{
    DocumentBundle, DocumentStore, InMemoryDocumentStore, SnapshotSaveResult, UpdateSaveResult,
};
