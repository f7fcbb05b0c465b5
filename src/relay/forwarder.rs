//! Forwards inbound chat messages to the control API.

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::frame::OutboundFrame;
use super::session::Outbound;
use crate::chat::ChatEvent;

/// Spawn the forwarding task.
///
/// Each event is written as a `message` frame on the current connection.
/// Events that arrive while the socket is down are dropped. The task ends
/// when `stop` is cancelled or the chat session closes its event channel.
pub fn spawn(
    mut events: broadcast::Receiver<ChatEvent>,
    outbound: Outbound,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = stop.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(event) => {
                    log::info!("[Forwarder] Received a message from {} in {}", event.sender, event.chat);
                    let id = event.id.clone();
                    if let Err(e) = outbound.send(&OutboundFrame::Message(event)).await {
                        log::warn!("[Forwarder] Dropped chat message {}: {}", id, e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("[Forwarder] Fell behind, skipped {} chat message(s)", skipped);
                }
                Err(RecvError::Closed) => {
                    log::info!("[Forwarder] Chat event stream closed");
                    break;
                }
            }
        }
        log::debug!("[Forwarder] Stopped");
    })
}
