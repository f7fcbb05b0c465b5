//! message-relay - chat network ⇄ control API bridge.
//!
//! The relay authenticates to a remote control API over a WebSocket,
//! executes the `create`/`delete` commands it receives against a chat
//! session, and forwards inbound chat messages back out.
//!
//! # Modules
//!
//! - [`relay`] - control socket session, command dispatch, event forwarding
//! - [`markup`] - rich-text HTML to chat styling conversion
//! - [`chat`] - chat-session capability and its implementations
//! - [`config`] - configuration loading
//! - [`ws`] - WebSocket transport
//! - [`constants`] - timing and protocol constants

pub mod chat;
pub mod config;
pub mod constants;
pub mod markup;
pub mod relay;
pub mod ws;

pub use chat::{ChatSession, Jid};
pub use config::Config;
pub use relay::{Dispatcher, RelayHandle, RelaySession, SessionState};
