//! HTTP client for a chat gateway.
//!
//! The gateway is a separate process that owns the chat-network login,
//! device credentials and protocol. It exposes:
//!
//! - `GET  {base}/status` - liveness, checked once at startup
//! - `POST {base}/messages` `{to, id, text}` - send, returns a [`Receipt`]
//! - `DELETE {base}/messages/{id}?chat={jid}` - revoke, returns a [`Receipt`]
//! - `GET  {base}/events?after={cursor}` - inbound messages since `cursor`
//! - `GET  {base}/groups` - joined groups as `[{jid, name}]`
//!
//! Inbound events are polled and republished on a broadcast channel.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ChatError, ChatEvent, ChatSession, GroupInfo, Jid, Receipt};
use crate::constants::{CHAT_EVENT_CAPACITY, HTTP_REQUEST_TIMEOUT};

/// Body of `POST /messages`.
#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    to: &'a Jid,
    id: &'a str,
    text: &'a str,
}

/// Body of `GET /events`.
#[derive(Debug, Deserialize)]
struct EventBatch {
    /// Cursor to pass as `after` on the next poll.
    cursor: Option<String>,
    #[serde(default)]
    events: Vec<ChatEvent>,
}

/// Chat session backed by a gateway's HTTP API.
#[derive(Debug)]
pub struct GatewaySession {
    base_url: String,
    client: reqwest::Client,
    events: broadcast::Sender<ChatEvent>,
    stop: CancellationToken,
}

impl GatewaySession {
    /// Create a session and verify the gateway answers `GET /status`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the gateway is
    /// unreachable or unhealthy.
    pub async fn connect(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        let base_url = base_url.trim_end_matches('/').to_string();
        let status_url = format!("{base_url}/status");
        client
            .get(&status_url)
            .send()
            .await
            .with_context(|| format!("Chat gateway unreachable at {status_url}"))?
            .error_for_status()
            .context("Chat gateway reported an unhealthy status")?;

        log::info!("[Gateway] Connected to {}", base_url);

        let (events, _) = broadcast::channel(CHAT_EVENT_CAPACITY);
        Ok(Self {
            base_url,
            client,
            events,
            stop: CancellationToken::new(),
        })
    }

    /// Start polling the gateway's event feed every `interval`.
    ///
    /// The task runs until [`ChatSession::disconnect`] is called. Poll
    /// failures are logged and retried on the next tick.
    pub fn spawn_event_poller(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut cursor: Option<String> = None;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = session.stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match session.poll_events(cursor.as_deref()).await {
                    Ok(batch) => {
                        for event in batch.events {
                            log::debug!("[Gateway] Inbound message {} from {}", event.id, event.sender);
                            // No subscribers is not an error; the event is simply dropped.
                            let _ = session.events.send(event);
                        }
                        if batch.cursor.is_some() {
                            cursor = batch.cursor;
                        }
                    }
                    Err(e) => log::warn!("[Gateway] Event poll failed: {}", e),
                }
            }
            log::debug!("[Gateway] Event poller stopped");
        })
    }

    async fn poll_events(&self, after: Option<&str>) -> Result<EventBatch, ChatError> {
        let mut request = self.client.get(format!("{}/events", self.base_url));
        if let Some(after) = after {
            request = request.query(&[("after", after)]);
        }
        let response = request.send().await.map_err(transport)?;
        decode(response).await
    }

    fn ensure_connected(&self) -> Result<(), ChatError> {
        if self.stop.is_cancelled() {
            Err(ChatError::Disconnected)
        } else {
            Ok(())
        }
    }
}

fn transport(e: reqwest::Error) -> ChatError {
    ChatError::Transport(e.to_string())
}

/// Map a gateway response to its JSON body or a [`ChatError`].
///
/// 4xx means the chat network refused the operation; 5xx and unreadable
/// bodies are transport failures.
async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ChatError> {
    let status = response.status();
    if status.is_client_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(ChatError::Rejected(format!("{status}: {}", body.trim())));
    }
    if !status.is_success() {
        return Err(ChatError::Transport(format!("gateway returned {status}")));
    }
    response.json::<T>().await.map_err(transport)
}

#[async_trait]
impl ChatSession for GatewaySession {
    async fn send_message(&self, to: &Jid, id: &str, text: &str) -> Result<Receipt, ChatError> {
        self.ensure_connected()?;
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .json(&SendRequest { to, id, text })
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    async fn revoke_message(&self, chat: &Jid, id: &str) -> Result<Receipt, ChatError> {
        self.ensure_connected()?;
        let chat = chat.to_string();
        let response = self
            .client
            .delete(format!("{}/messages/{}", self.base_url, id))
            .query(&[("chat", chat.as_str())])
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    async fn joined_groups(&self) -> Result<Vec<GroupInfo>, ChatError> {
        self.ensure_connected()?;
        let response = self
            .client
            .get(format!("{}/groups", self.base_url))
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) {
        self.stop.cancel();
        log::info!("[Gateway] Disconnected from {}", self.base_url);
    }
}
