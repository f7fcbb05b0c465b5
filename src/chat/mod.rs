//! Chat-session capability.
//!
//! The relay never speaks the chat network's own protocol. It drives a
//! [`ChatSession`], which owns login, device credentials and the actual
//! send/revoke primitives, and listens to its inbound [`ChatEvent`]s.
//!
//! # Implementations
//!
//! ```text
//! ChatSession (trait)
//!     │
//!     ├── GatewaySession   HTTP client for a chat gateway process
//!     │
//!     └── ConsoleSession   dry run: logs commands, reads events from stdin
//! ```

pub mod console;
pub mod gateway;
pub mod jid;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use console::ConsoleSession;
pub use gateway::GatewaySession;
pub use jid::{Jid, JidError};

/// Acknowledgement returned by the chat network for a send or revoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Message id the chat network recorded.
    pub id: String,
    /// Server timestamp of the operation.
    pub timestamp: DateTime<Utc>,
}

/// A group conversation the account belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    /// Group identity, usable as a recipient.
    pub jid: String,
    /// Display name.
    pub name: String,
}

/// A message received on the chat network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Chat-network message id.
    pub id: String,
    /// Conversation the message arrived in.
    pub chat: String,
    /// Identity of the author.
    pub sender: String,
    /// Plain-text body.
    pub text: String,
    /// When the message was sent.
    pub timestamp: DateTime<Utc>,
}

/// Errors reported by a [`ChatSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The chat network refused the operation.
    Rejected(String),
    /// Could not reach the chat network (or its gateway).
    Transport(String),
    /// The session has been disconnected.
    Disconnected,
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(msg) => write!(f, "Rejected by chat network: {msg}"),
            Self::Transport(msg) => write!(f, "Chat transport error: {msg}"),
            Self::Disconnected => write!(f, "Chat session disconnected"),
        }
    }
}

impl std::error::Error for ChatError {}

/// An authenticated session on the chat network.
///
/// Implementors must be shareable across tasks: the dispatcher calls
/// send/revoke from the read loop while the forwarder consumes events.
#[async_trait]
pub trait ChatSession: Send + Sync {
    /// Send `text` to `to`, using `id` as the client-assigned message id.
    ///
    /// # Errors
    ///
    /// Returns an error if the chat network rejects or cannot receive the message.
    async fn send_message(&self, to: &Jid, id: &str, text: &str) -> Result<Receipt, ChatError>;

    /// Revoke (delete for everyone) message `id` previously sent to `chat`.
    ///
    /// # Errors
    ///
    /// Returns an error if the revoke is refused or cannot be delivered.
    async fn revoke_message(&self, chat: &Jid, id: &str) -> Result<Receipt, ChatError>;

    /// Groups the account has joined.
    ///
    /// Sessions without group support report none.
    async fn joined_groups(&self) -> Result<Vec<GroupInfo>, ChatError> {
        Ok(Vec::new())
    }

    /// Subscribe to inbound chat messages.
    fn subscribe(&self) -> broadcast::Receiver<ChatEvent>;

    /// Disconnect from the chat network. Later calls fail with [`ChatError::Disconnected`].
    async fn disconnect(&self);
}
