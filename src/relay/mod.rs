//! Relay between the control API socket and the chat session.
//!
//! # Architecture
//!
//! ```text
//!   control API ──ws──► RelaySession read loop ──► Dispatcher ──► ChatSession
//!        ▲                                          (markup)          │
//!        │                                                            │
//!        └────────────── Outbound ◄──── Forwarder ◄──── ChatEvent ────┘
//! ```
//!
//! - [`session`] - socket lifecycle, handshake, reconnect and shutdown
//! - [`dispatcher`] - applies `create`/`delete` commands per recipient
//! - [`frame`] - JSON wire frames
//! - [`forwarder`] - pushes inbound chat messages outward

pub mod dispatcher;
pub mod forwarder;
pub mod frame;
pub mod session;

pub use dispatcher::{DispatchOutcome, DispatchReport, Dispatcher};
pub use frame::{CommandFrame, CommandKind, FrameError, OutboundFrame, RecipientFailure};
pub use session::{Outbound, ReconnectPolicy, RelayConfig, RelayHandle, RelaySession, SendError, SessionState};
