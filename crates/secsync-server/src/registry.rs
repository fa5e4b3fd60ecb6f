//! Per-document connection registry.
//!
//! An owned table keyed by connection id; no connection holds a reference
//! to another. Broadcast iterates a snapshot clone of the senders so a
//! connect/disconnect during fan-out cannot invalidate the iteration.
//!
//! Locks are held only for map access, never across sends that could
//! block: senders are unbounded, so `send` is synchronous.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Identifies one socket connection.
pub type ConnectionId = u64;

type SenderMap = HashMap<ConnectionId, mpsc::UnboundedSender<String>>;

/// Fan-out table: document id → connected sockets.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<HashMap<String, SenderMap>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a document and get its id.
    pub fn register(&self, doc_id: &str, sender: mpsc::UnboundedSender<String>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .write()
            .entry(doc_id.to_string())
            .or_default()
            .insert(id, sender);
        id
    }

    /// Remove a connection; drops the document entry when it was the last.
    pub fn deregister(&self, doc_id: &str, connection_id: ConnectionId) {
        let mut inner = self.inner.write();
        if let Some(connections) = inner.get_mut(doc_id) {
            connections.remove(&connection_id);
            if connections.is_empty() {
                inner.remove(doc_id);
            }
        }
    }

    /// Number of connections registered for a document.
    pub fn connection_count(&self, doc_id: &str) -> usize {
        self.inner.read().get(doc_id).map_or(0, HashMap::len)
    }

    /// Send a frame to one connection.
    pub fn send_to(&self, doc_id: &str, connection_id: ConnectionId, text: &str) {
        let sender = self
            .inner
            .read()
            .get(doc_id)
            .and_then(|connections| connections.get(&connection_id).cloned());
        if let Some(sender) = sender {
            let _ = sender.send(text.to_string());
        }
    }

    /// Send a frame to every connection of a document except one
    /// (normally the author).
    pub fn broadcast_except(&self, doc_id: &str, exclude: ConnectionId, text: &str) {
        let targets: Vec<mpsc::UnboundedSender<String>> = self
            .inner
            .read()
            .get(doc_id)
            .map(|connections| {
                connections
                    .iter()
                    .filter(|(id, _)| **id != exclude)
                    .map(|(_, sender)| sender.clone())
                    .collect()
            })
            .unwrap_or_default();
        for sender in targets {
            let _ = sender.send(text.to_string());
        }
    }
}
