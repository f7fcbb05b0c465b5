//! Shared fixtures for integration tests.
//!
//! - [`RecordingChat`] - in-memory chat session that records every call
//! - [`ControlApi`] - local WebSocket server standing in for the control API

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use message_relay::chat::{ChatError, ChatEvent, ChatSession, Jid, Receipt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Upper bound for any single wait in a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A call made against [`RecordingChat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCall {
    Send { to: String, id: String, text: String },
    Revoke { chat: String, id: String },
}

/// Chat session that records calls and fails for chosen recipients.
pub struct RecordingChat {
    calls: Mutex<Vec<ChatCall>>,
    failing: HashSet<String>,
    events: broadcast::Sender<ChatEvent>,
    disconnected: AtomicBool,
}

impl RecordingChat {
    pub fn new() -> Self {
        Self::failing_for(&[])
    }

    /// Reject every operation addressed to one of `recipients`.
    pub fn failing_for(recipients: &[&str]) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            calls: Mutex::new(Vec::new()),
            failing: recipients.iter().map(|r| (*r).to_string()).collect(),
            events,
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Publish an inbound message; returns the number of subscribers.
    pub fn inject(&self, event: ChatEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    fn record(&self, target: &Jid, call: ChatCall) -> Result<Receipt, ChatError> {
        let id = match &call {
            ChatCall::Send { id, .. } | ChatCall::Revoke { id, .. } => id.clone(),
        };
        self.calls.lock().unwrap().push(call);
        if self.failing.contains(&target.to_string()) {
            return Err(ChatError::Rejected(format!("{target} refused")));
        }
        Ok(Receipt {
            id,
            timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl ChatSession for RecordingChat {
    async fn send_message(&self, to: &Jid, id: &str, text: &str) -> Result<Receipt, ChatError> {
        self.record(
            to,
            ChatCall::Send {
                to: to.to_string(),
                id: id.to_string(),
                text: text.to_string(),
            },
        )
    }

    async fn revoke_message(&self, chat: &Jid, id: &str) -> Result<Receipt, ChatError> {
        self.record(
            chat,
            ChatCall::Revoke {
                chat: chat.to_string(),
                id: id.to_string(),
            },
        )
    }

    fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// A fixed inbound chat message.
pub fn sample_event(id: &str) -> ChatEvent {
    ChatEvent {
        id: id.to_string(),
        chat: "120363025246125486@g.us".to_string(),
        sender: "491701234567@s.whatsapp.net".to_string(),
        text: "hello from the group".to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    }
}

/// Local WebSocket server playing the control API.
pub struct ControlApi {
    listener: TcpListener,
    addr: SocketAddr,
}

impl ControlApi {
    pub async fn bind() -> Self {
        Self::bind_to("127.0.0.1:0".parse().unwrap()).await
    }

    /// Listen on `addr` again, e.g. after dropping a previous server.
    pub async fn bind_to(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        Self { listener, addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Accept the next relay connection.
    pub async fn accept(&self) -> ControlConn {
        tokio::time::timeout(TEST_TIMEOUT, self.try_accept())
            .await
            .expect("relay did not connect in time")
    }

    /// Accept a connection if one arrives within `wait`.
    pub async fn accept_within(&self, wait: Duration) -> Option<ControlConn> {
        tokio::time::timeout(wait, self.try_accept()).await.ok()
    }

    async fn try_accept(&self) -> ControlConn {
        let (stream, _) = self.listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ControlConn { ws }
    }
}

/// One accepted relay connection, seen from the server side.
pub struct ControlConn {
    ws: WebSocketStream<TcpStream>,
}

impl ControlConn {
    /// Next non-control message, or `None` once the relay hung up.
    pub async fn next_message(&mut self) -> Option<Message> {
        tokio::time::timeout(TEST_TIMEOUT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(message)) => return Some(message),
                    Some(Err(_)) | None => return None,
                }
            }
        })
        .await
        .expect("no message from relay in time")
    }

    /// Next frame, decoded as JSON.
    pub async fn recv_json(&mut self) -> Value {
        match self.next_message().await {
            Some(Message::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    pub async fn send_json(&mut self, value: &Value) {
        self.send_text(&value.to_string()).await;
    }

    pub async fn send_ping(&mut self, data: &[u8]) {
        self.ws.send(Message::Ping(data.to_vec())).await.unwrap();
    }

    /// Start the closing handshake from the server side.
    pub async fn close_with(&mut self, code: CloseCode, reason: &str) {
        let frame = CloseFrame {
            code,
            reason: reason.to_string().into(),
        };
        self.ws.send(Message::Close(Some(frame))).await.unwrap();
    }

    /// Wait for a raw frame, including pongs.
    pub async fn next_raw(&mut self) -> Option<Message> {
        tokio::time::timeout(TEST_TIMEOUT, self.ws.next())
            .await
            .expect("no frame from relay in time")
            .and_then(Result::ok)
    }
}
