//! Websocket transport actor.
//!
//! Owns the socket for one document connection and translates between
//! wire frames and machine events. The machine side holds only channel
//! handles; reconnection with backoff happens here.

use crate::event::SyncEvent;
use futures_util::{SinkExt, StreamExt};
use secsync_protocol::wire::{parse_server_frame, ParsedFrame};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// How long a connection attempt may take before it counts as failed.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// First reconnect delay; grows linearly with failed attempts.
pub const BASE_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Delay before the next reconnect attempt.
pub fn reconnect_delay(base: Duration, unsuccessful_reconnects: u32) -> Duration {
    base * (1 + unsuccessful_reconnects)
}

/// Run the transport until the event receiver goes away or the outbound
/// channel closes.
///
/// Every lifecycle change is reported as an event: `WebsocketConnected`
/// on open, `WebsocketDisconnected` on close, failure, or open timeout,
/// and `WebsocketRetry` right before each new attempt.
pub async fn run_websocket_transport(
    url: String,
    event_tx: mpsc::UnboundedSender<SyncEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
) {
    let mut unsuccessful_reconnects: u32 = 0;
    loop {
        match timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await {
            Ok(Ok((stream, _response))) => {
                unsuccessful_reconnects = 0;
                if event_tx.send(SyncEvent::WebsocketConnected).is_err() {
                    return;
                }
                let (mut sink, mut source) = stream.split();
                loop {
                    tokio::select! {
                        outbound = outbound_rx.recv() => {
                            match outbound {
                                Some(text) => {
                                    if sink.send(Message::Text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                None => {
                                    // Client handle dropped: clean shutdown.
                                    let _ = sink.close().await;
                                    return;
                                }
                            }
                        }
                        incoming = source.next() => {
                            match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    forward_frame(&text, &event_tx);
                                }
                                Some(Ok(Message::Binary(bytes))) => {
                                    match String::from_utf8(bytes) {
                                        Ok(text) => forward_frame(&text, &event_tx),
                                        Err(_) => warn!("dropping non-utf8 binary frame"),
                                    }
                                }
                                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                            }
                        }
                    }
                }
                if event_tx.send(SyncEvent::WebsocketDisconnected).is_err() {
                    return;
                }
            }
            Ok(Err(err)) => {
                debug!(error = %err, "websocket connect failed");
                if event_tx.send(SyncEvent::WebsocketDisconnected).is_err() {
                    return;
                }
            }
            Err(_elapsed) => {
                debug!("websocket open timed out");
                if event_tx.send(SyncEvent::WebsocketDisconnected).is_err() {
                    return;
                }
            }
        }

        let delay = reconnect_delay(BASE_RECONNECT_DELAY, unsuccessful_reconnects);
        unsuccessful_reconnects = unsuccessful_reconnects.saturating_add(1);
        sleep(delay).await;
        if event_tx.send(SyncEvent::WebsocketRetry).is_err() {
            return;
        }
    }
}

fn forward_frame(text: &str, event_tx: &mpsc::UnboundedSender<SyncEvent>) {
    match parse_server_frame(text) {
        Ok(ParsedFrame::Known(frame)) => {
            let _ = event_tx.send(SyncEvent::WebsocketAddToIncomingQueue(frame));
        }
        Ok(ParsedFrame::Custom(value)) => {
            let _ = event_tx.send(SyncEvent::WebsocketAddToCustomMessageQueue(value));
        }
        Err(err) => {
            warn!(error = %err, "dropping malformed frame");
        }
    }
}
