//! Client runtime wiring.
//!
//! Spawns the transport actor and the machine loop and exposes a handle
//! for the host to feed events in. The machine loop drains one event at a
//! time; effects are executed before the next event is taken.

use crate::config::SyncConfig;
use crate::event::{SyncEffect, SyncEvent};
use crate::host::SyncHost;
use crate::machine::SyncMachine;
use crate::transport::run_websocket_transport;
use rand::rngs::OsRng;
use secsync_core::{Result, SecsyncError};
use secsync_protocol::ephemeral::EphemeralMessageType;
use secsync_protocol::wire::serialize_client_frame;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::warn;

/// A running sync client for one document.
pub struct SyncClient {
    event_tx: mpsc::UnboundedSender<SyncEvent>,
    machine_task: JoinHandle<()>,
    transport_task: JoinHandle<()>,
}

impl SyncClient {
    /// Spawn the transport and machine tasks and start connecting.
    pub fn connect<H>(config: SyncConfig, host: H) -> Self
    where
        H: SyncHost + 'static,
    {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let url = config.connection_url();
        let transport_task =
            tokio::spawn(run_websocket_transport(url, event_tx.clone(), outbound_rx));
        let transport_abort = transport_task.abort_handle();

        let machine = SyncMachine::new(config, OsRng);
        let machine_task = tokio::spawn(run_machine(
            machine,
            host,
            event_rx,
            outbound_tx,
            transport_abort,
        ));

        Self {
            event_tx,
            machine_task,
            transport_task,
        }
    }

    fn send(&self, event: SyncEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .map_err(|_| SecsyncError::transport("sync client has stopped"))
    }

    /// Queue local changes for synchronization.
    pub fn add_changes(&self, changes: Vec<Value>) -> Result<()> {
        self.send(SyncEvent::AddChanges(changes))
    }

    /// Ask for a fresh snapshot of the current document state.
    pub fn create_snapshot(&self) -> Result<()> {
        self.send(SyncEvent::CreateSnapshot)
    }

    /// Broadcast an ephemeral payload to peers with verified sessions.
    pub fn send_ephemeral_message(&self, body: Vec<u8>) -> Result<()> {
        self.send(SyncEvent::SendEphemeralMessage {
            body,
            message_type: EphemeralMessageType::Message,
        })
    }

    /// Close the connection and stop reconnecting.
    pub fn disconnect(&self) -> Result<()> {
        self.send(SyncEvent::Disconnect)
    }

    /// Stop both actors.
    pub async fn shutdown(self) {
        let _ = self.send(SyncEvent::Disconnect);
        drop(self.event_tx);
        self.transport_task.abort();
        let _ = self.machine_task.await;
    }
}

async fn run_machine<H, R>(
    mut machine: SyncMachine<R>,
    host: H,
    mut event_rx: mpsc::UnboundedReceiver<SyncEvent>,
    outbound_tx: mpsc::UnboundedSender<String>,
    transport_abort: AbortHandle,
) where
    H: SyncHost,
    R: rand::RngCore + rand::CryptoRng,
{
    while let Some(event) = event_rx.recv().await {
        let effects = machine.handle_event(event, &host).await;
        for effect in effects {
            match effect {
                SyncEffect::SendFrame(frame) => match serialize_client_frame(&frame) {
                    Ok(text) => {
                        if outbound_tx.send(text).is_err() {
                            warn!("transport gone while sending frame");
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to serialize outbound frame"),
                },
                SyncEffect::CloseConnection => {
                    transport_abort.abort();
                }
            }
        }
    }
}
