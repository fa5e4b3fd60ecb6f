//! Server message handling.
//!
//! Bridges the socket layer and the store: on connect it delivers the
//! document bundle, afterwards it validates and persists snapshots and
//! updates, acks the author, and fans accepted artifacts out to every
//! other connection. Ephemeral messages are relayed and never persisted.

use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::store::{DocumentStore, SnapshotSaveResult, UpdateSaveResult};
use secsync_protocol::wire::{
    serialize_server_frame, ClientFrame, DocumentFrame, ServerFrame, UpdateServerData,
};
use secsync_core::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Server behavior knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerConfig {
    /// Create documents on first connect instead of rejecting them.
    pub create_missing_documents: bool,
}

/// Handles all frames for the documents of one server process.
pub struct DocumentHandler<S: DocumentStore> {
    store: Arc<S>,
    registry: Arc<ConnectionRegistry>,
    config: ServerConfig,
}

impl<S: DocumentStore> DocumentHandler<S> {
    /// Create a handler over a store and a connection registry.
    pub fn new(store: Arc<S>, registry: Arc<ConnectionRegistry>, config: ServerConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// The registry connections are tracked in.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Handle a new connection for `doc_id`.
    ///
    /// Returns the registered connection id, or `None` when the document
    /// does not exist (the caller should close the socket after the
    /// `document-not-found` frame is flushed).
    pub async fn on_connect(
        &self,
        doc_id: &str,
        sender: mpsc::UnboundedSender<String>,
    ) -> Result<Option<ConnectionId>> {
        let bundle = match self.store.load_document(doc_id).await? {
            Some(bundle) => Some(bundle),
            None if self.config.create_missing_documents => {
                Some(self.store.create_document(doc_id).await?)
            }
            None => None,
        };
        let Some(bundle) = bundle else {
            let frame = serialize_server_frame(&ServerFrame::DocumentNotFound)?;
            let _ = sender.send(frame);
            return Ok(None);
        };

        let connection_id = self.registry.register(doc_id, sender);
        let document = ServerFrame::Document(DocumentFrame {
            snapshot: bundle.snapshot,
            updates: bundle.updates,
        });
        self.registry
            .send_to(doc_id, connection_id, &serialize_server_frame(&document)?);
        debug!(doc_id, connection_id, "connection registered");
        Ok(Some(connection_id))
    }

    /// Drop a connection from the fan-out set.
    pub fn on_disconnect(&self, doc_id: &str, connection_id: ConnectionId) {
        self.registry.deregister(doc_id, connection_id);
    }

    /// Handle one frame from a connected client.
    pub async fn on_frame(
        &self,
        doc_id: &str,
        connection_id: ConnectionId,
        frame: ClientFrame,
    ) -> Result<()> {
        match frame {
            ClientFrame::Snapshot(snapshot) => {
                self.on_snapshot(doc_id, connection_id, snapshot).await
            }
            ClientFrame::Update(update) => self.on_update(doc_id, connection_id, update).await,
            ClientFrame::EphemeralMessage(message) => {
                self.on_ephemeral(doc_id, connection_id, message)
            }
        }
    }

    async fn on_snapshot(
        &self,
        doc_id: &str,
        connection_id: ConnectionId,
        snapshot: secsync_protocol::wire::Snapshot,
    ) -> Result<()> {
        if snapshot.public_data.doc_id != doc_id {
            warn!(doc_id, "dropping snapshot addressed to another document");
            return Ok(());
        }
        let snapshot_id = snapshot.public_data.snapshot_id.clone();
        match self.store.save_snapshot(snapshot.clone()).await? {
            SnapshotSaveResult::Saved => {
                let ack = ServerFrame::SnapshotSaved {
                    snapshot_id,
                    doc_id: doc_id.to_string(),
                };
                self.registry
                    .send_to(doc_id, connection_id, &serialize_server_frame(&ack)?);
                let broadcast = ServerFrame::Snapshot { snapshot };
                self.registry.broadcast_except(
                    doc_id,
                    connection_id,
                    &serialize_server_frame(&broadcast)?,
                );
            }
            SnapshotSaveResult::Failed { snapshot, updates } => {
                let failure = ServerFrame::SnapshotSaveFailed {
                    doc_id: doc_id.to_string(),
                    snapshot,
                    updates,
                };
                self.registry
                    .send_to(doc_id, connection_id, &serialize_server_frame(&failure)?);
            }
        }
        Ok(())
    }

    async fn on_update(
        &self,
        doc_id: &str,
        connection_id: ConnectionId,
        update: secsync_protocol::wire::Update,
    ) -> Result<()> {
        if update.public_data.doc_id != doc_id {
            warn!(doc_id, "dropping update addressed to another document");
            return Ok(());
        }
        let snapshot_id = update.public_data.ref_snapshot_id.clone();
        let clock = update.public_data.clock;
        match self.store.save_update(update.clone()).await? {
            UpdateSaveResult::Saved { version } => {
                let ack = ServerFrame::UpdateSaved {
                    doc_id: doc_id.to_string(),
                    snapshot_id,
                    clock,
                    server_version: version,
                };
                self.registry
                    .send_to(doc_id, connection_id, &serialize_server_frame(&ack)?);
                let mut broadcast_update = update;
                broadcast_update.server_data = Some(UpdateServerData { version });
                let broadcast = ServerFrame::Update(broadcast_update);
                self.registry.broadcast_except(
                    doc_id,
                    connection_id,
                    &serialize_server_frame(&broadcast)?,
                );
            }
            UpdateSaveResult::Failed => {
                let failure = ServerFrame::UpdateSaveFailed {
                    doc_id: doc_id.to_string(),
                    snapshot_id,
                    clock,
                };
                self.registry
                    .send_to(doc_id, connection_id, &serialize_server_frame(&failure)?);
            }
        }
        Ok(())
    }

    /// Relay an ephemeral message; the server cannot read it and never
    /// stores it.
    fn on_ephemeral(
        &self,
        doc_id: &str,
        connection_id: ConnectionId,
        message: secsync_protocol::wire::EphemeralMessage,
    ) -> Result<()> {
        if message.public_data.doc_id != doc_id {
            warn!(doc_id, "dropping ephemeral message addressed to another document");
            return Ok(());
        }
        let broadcast = ServerFrame::EphemeralMessage(message);
        self.registry
            .broadcast_except(doc_id, connection_id, &serialize_server_frame(&broadcast)?);
        Ok(())
    }
}
