//! Sync machine inputs and effects.

use secsync_core::SecsyncError;
use secsync_protocol::ephemeral::EphemeralMessageType;
use secsync_protocol::wire::{ClientFrame, ServerFrame};
use serde_json::Value;

/// Events fed into the sync machine, from the transport or the host.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The socket opened.
    WebsocketConnected,
    /// The socket closed or failed to open in time.
    WebsocketDisconnected,
    /// The transport is about to retry the connection.
    WebsocketRetry,
    /// A protocol frame arrived.
    WebsocketAddToIncomingQueue(Box<ServerFrame>),
    /// A frame with an unknown `type` arrived.
    WebsocketAddToCustomMessageQueue(Value),
    /// The host produced local changes.
    AddChanges(Vec<Value>),
    /// The host requests a snapshot now.
    CreateSnapshot,
    /// The host wants to shut the connection down.
    Disconnect,
    /// An ephemeral message could not be created.
    FailedCreatingEphemeralMessage(SecsyncError),
    /// The host wants to broadcast an ephemeral payload.
    SendEphemeralMessage {
        /// Application payload bytes.
        body: Vec<u8>,
        /// Payload framing type, normally [`EphemeralMessageType::Message`].
        message_type: EphemeralMessageType,
    },
}

/// Instructions the machine hands back to its runtime.
#[derive(Debug, Clone)]
pub enum SyncEffect {
    /// Serialize and send a frame over the socket.
    SendFrame(Box<ClientFrame>),
    /// Close the socket and stop reconnecting.
    CloseConnection,
}
