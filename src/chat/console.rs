//! Dry-run chat session.
//!
//! Used when no gateway is configured. Outbound commands are logged instead
//! of delivered; inbound messages can be typed on stdin as `<jid> <text>`.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::{ChatError, ChatEvent, ChatSession, Jid, Receipt};
use crate::constants::CHAT_EVENT_CAPACITY;

/// Chat session that only logs.
#[derive(Debug)]
pub struct ConsoleSession {
    events: broadcast::Sender<ChatEvent>,
    disconnected: AtomicBool,
}

impl Default for ConsoleSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleSession {
    /// Create a console session with no event source attached.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(CHAT_EVENT_CAPACITY);
        Self {
            events,
            disconnected: AtomicBool::new(false),
        }
    }

    /// Publish an inbound event as if it arrived from the chat network.
    ///
    /// Returns the number of subscribers that received it.
    pub fn inject(&self, event: ChatEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    /// Read `<jid> <text>` lines from `input` and publish them as events.
    ///
    /// Lines with a malformed identity are logged and skipped. The task ends
    /// at end of input.
    pub fn spawn_line_reader<R>(self: &std::sync::Arc<Self>, input: R) -> JoinHandle<()>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let session = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut lines = input.lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("[Console] Failed to read input: {}", e);
                        break;
                    }
                };
                match parse_line(&line) {
                    Some(Ok(event)) => {
                        session.inject(event);
                    }
                    Some(Err(e)) => log::warn!("[Console] Ignoring line: {}", e),
                    None => {}
                }
            }
            log::debug!("[Console] Input closed");
        })
    }

    fn ensure_connected(&self) -> Result<(), ChatError> {
        if self.disconnected.load(Ordering::SeqCst) {
            Err(ChatError::Disconnected)
        } else {
            Ok(())
        }
    }
}

/// Parse one `<jid> <text>` line. Blank lines yield `None`.
fn parse_line(line: &str) -> Option<Result<ChatEvent, super::JidError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (jid, text) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    Some(jid.parse::<Jid>().map(|jid| ChatEvent {
        id: uuid::Uuid::new_v4().simple().to_string().to_uppercase(),
        chat: jid.to_string(),
        sender: jid.to_string(),
        text: text.trim().to_string(),
        timestamp: Utc::now(),
    }))
}

#[async_trait]
impl ChatSession for ConsoleSession {
    async fn send_message(&self, to: &Jid, id: &str, text: &str) -> Result<Receipt, ChatError> {
        self.ensure_connected()?;
        log::info!("[Console] send {} to {}: {:?}", id, to, text);
        Ok(Receipt {
            id: id.to_string(),
            timestamp: Utc::now(),
        })
    }

    async fn revoke_message(&self, chat: &Jid, id: &str) -> Result<Receipt, ChatError> {
        self.ensure_connected()?;
        log::info!("[Console] revoke {} in {}", id, chat);
        Ok(Receipt {
            id: id.to_string(),
            timestamp: Utc::now(),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        log::info!("[Console] Disconnected");
    }
}
