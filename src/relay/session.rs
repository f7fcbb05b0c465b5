//! Control API session: handshake, read loop, reconnection and shutdown.
//!
//! # State machine
//!
//! ```text
//!   Dialing ──► Authenticating ──► Active ──read failure──► Disconnected
//!                     ▲                                         │
//!                     │                           ┌─────────────┴───────────┐
//!                     │                   not terminating              terminating
//!                     │                           ▼                         ▼
//!                     └──────dial ok──── Reconnecting{attempt}          Terminated
//! ```
//!
//! The initial dial happens in [`RelaySession::connect`] and its failure is
//! returned to the caller. Afterwards a single background task owns the
//! reader: it reads, dispatches frames in arrival order, and on failure
//! retires the old socket before dialing a new one. Reading and reconnecting
//! in one task means at most one read loop exists per session.
//!
//! # Shared state
//!
//! The writer half and the `terminating` flag live together in a `Link`
//! behind one mutex. Shutdown sets the flag under that lock, and a reconnect
//! only installs a freshly dialed writer under the same lock after checking
//! the flag, so a close can never be overtaken by a reconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::dispatcher::{DispatchOutcome, Dispatcher};
use super::frame::{CommandFrame, FrameError, OutboundFrame};
use crate::chat::ChatSession;
use crate::constants::{
    CLOSE_REASON, READ_LOOP_JOIN_TIMEOUT, RECONNECT_INITIAL_DELAY, RECONNECT_MAX_DELAY, SHUTDOWN_GRACE,
    STABLE_CONNECTION_PERIOD,
};
use crate::ws::{self, WsMessage, WsReader, WsWriter};

/// Lifecycle of the control API connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Opening the socket.
    Dialing,
    /// Socket open; sending the identity key.
    Authenticating,
    /// Read loop running.
    Active,
    /// A read failed; deciding whether to reconnect.
    Disconnected,
    /// Re-dialing after a disconnect.
    Reconnecting {
        /// 1-based dial attempt since the disconnect.
        attempt: u32,
    },
    /// Shut down on request; no further reconnects.
    Terminated,
}

impl SessionState {
    /// State entered when a read fails.
    ///
    /// Only an intentional shutdown ends the session; every other failure
    /// leads to a reconnect.
    pub fn after_read_failure(terminating: bool) -> Self {
        if terminating {
            Self::Terminated
        } else {
            Self::Disconnected
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dialing => write!(f, "dialing"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Active => write!(f, "active"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Delay schedule between reconnect attempts.
///
/// The first attempt after losing a healthy connection is immediate. Every
/// failed dial, and every connection that drops before it is verified or has
/// stayed up for [`STABLE_CONNECTION_PERIOD`], makes the next attempt wait
/// `initial`, then twice as long, up to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay after the first failed attempt.
    pub initial: Duration,
    /// Upper bound for the delay.
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: RECONNECT_INITIAL_DELAY,
            max: RECONNECT_MAX_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Delay to wait after a failed attempt that waited `current`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        if current.is_zero() {
            self.initial.min(self.max)
        } else {
            current.saturating_mul(2).min(self.max)
        }
    }
}

/// Settings for one relay session.
#[derive(Clone)]
pub struct RelayConfig {
    /// `ws://` or `wss://` endpoint of the control API.
    pub endpoint: String,
    /// Pre-shared identity key sent in the handshake.
    pub identity_key: String,
    /// Send an `ack` frame after each `create`/`delete`.
    pub acknowledge_commands: bool,
    /// Reconnect delays.
    pub reconnect: ReconnectPolicy,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("endpoint", &self.endpoint)
            .field("identity_key", &"<redacted>")
            .field("acknowledge_commands", &self.acknowledge_commands)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

/// Writer half plus the shutdown flag, guarded together.
#[derive(Debug, Default)]
struct Link {
    writer: Option<WsWriter>,
    terminating: bool,
}

/// Why an outbound frame was not sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The socket is down (between a disconnect and a successful reconnect).
    NotConnected,
    /// The session is shutting down.
    Terminating,
    /// The write itself failed.
    Failed(String),
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "control socket not connected"),
            Self::Terminating => write!(f, "session is shutting down"),
            Self::Failed(msg) => write!(f, "send failed: {msg}"),
        }
    }
}

impl std::error::Error for SendError {}

/// Cloneable handle for writing frames to the control API.
#[derive(Debug, Clone)]
pub struct Outbound {
    link: Arc<Mutex<Link>>,
}

impl Outbound {
    /// Send `frame` on the current connection.
    ///
    /// Fails fast instead of queueing while the socket is down.
    pub async fn send(&self, frame: &OutboundFrame) -> Result<(), SendError> {
        let mut link = self.link.lock().await;
        if link.terminating {
            return Err(SendError::Terminating);
        }
        let writer = link.writer.as_mut().ok_or(SendError::NotConnected)?;
        writer
            .send_json(frame)
            .await
            .map_err(|e| SendError::Failed(format!("{e:#}")))
    }
}

/// Entry point for establishing a relay session.
#[derive(Debug)]
pub struct RelaySession;

impl RelaySession {
    /// Dial the control API, authenticate, and start the read loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial dial or handshake send fails. There is
    /// no retry at startup.
    pub async fn connect(config: RelayConfig, dispatcher: Dispatcher) -> Result<RelayHandle> {
        let chat = dispatcher.chat();
        let (state_tx, _) = watch::channel(SessionState::Dialing);

        log::info!("[RelaySession] Connecting to {}", config.endpoint);
        let (writer, reader) = ws::connect(&config.endpoint)
            .await
            .context("Could not connect to control API")?;

        state_tx.send_replace(SessionState::Authenticating);
        let link = Arc::new(Mutex::new(Link {
            writer: Some(writer),
            terminating: false,
        }));
        authenticate(&mut *link.lock().await, &config.identity_key)
            .await
            .context("Could not send identity key to control API")?;
        state_tx.send_replace(SessionState::Active);
        log::info!("[RelaySession] Connected, identity key sent");

        let state_rx = state_tx.subscribe();
        let terminating = CancellationToken::new();
        let read_loop = ReadLoop {
            config,
            dispatcher,
            link: Arc::clone(&link),
            state: state_tx,
            terminating: terminating.clone(),
            backoff: Duration::ZERO,
            verified: false,
        };
        let read_loop = tokio::spawn(read_loop.run(reader));

        Ok(RelayHandle {
            link,
            state: state_rx,
            terminating,
            read_loop,
            chat,
        })
    }
}

/// Send the handshake on the link's current writer.
async fn authenticate(link: &mut Link, identity_key: &str) -> Result<()> {
    let writer = link.writer.as_mut().context("no writer installed")?;
    writer.send_json(&OutboundFrame::auth(identity_key)).await
}

/// Control surface for a running session.
pub struct RelayHandle {
    link: Arc<Mutex<Link>>,
    state: watch::Receiver<SessionState>,
    terminating: CancellationToken,
    read_loop: JoinHandle<()>,
    chat: Arc<dyn ChatSession>,
}

impl std::fmt::Debug for RelayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHandle")
            .field("state", &*self.state.borrow())
            .field("terminating", &self.terminating.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RelayHandle {
    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Handle for writing frames to the control API.
    pub fn outbound(&self) -> Outbound {
        Outbound {
            link: Arc::clone(&self.link),
        }
    }

    /// Token cancelled when shutdown begins, for tasks that should stop with the session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.terminating.child_token()
    }

    /// Run the shutdown protocol and wait for the read loop to exit.
    ///
    /// Order: disconnect the chat session, mark terminating, pause, send a
    /// normal-closure close frame, pause, close the socket.
    pub async fn shutdown(self) {
        log::info!("[RelaySession] Shutting down");
        self.chat.disconnect().await;

        {
            let mut link = self.link.lock().await;
            link.terminating = true;
            self.terminating.cancel();
        }
        tokio::time::sleep(SHUTDOWN_GRACE).await;

        if let Some(writer) = self.link.lock().await.writer.as_mut() {
            if let Err(e) = writer.send_close(CLOSE_REASON).await {
                log::warn!("[RelaySession] Error during websocket close: {:#}", e);
            }
        }
        tokio::time::sleep(SHUTDOWN_GRACE).await;

        if let Some(mut writer) = self.link.lock().await.writer.take() {
            if let Err(e) = writer.close().await {
                log::debug!("[RelaySession] Socket close: {:#}", e);
            }
        }

        let mut read_loop = self.read_loop;
        match tokio::time::timeout(READ_LOOP_JOIN_TIMEOUT, &mut read_loop).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("[RelaySession] Read loop panicked: {}", e),
            Err(_) => {
                log::warn!("[RelaySession] Read loop did not exit in time, aborting it");
                read_loop.abort();
            }
        }
        log::info!("[RelaySession] Terminated");
    }
}

/// How a connection's read phase ended.
#[derive(Debug)]
enum ReadExit {
    /// Shutdown was requested.
    Terminating,
    /// The connection failed.
    Failed(String),
}

/// Background task owning the reader.
struct ReadLoop {
    config: RelayConfig,
    dispatcher: Dispatcher,
    link: Arc<Mutex<Link>>,
    state: watch::Sender<SessionState>,
    terminating: CancellationToken,
    /// Wait before the next dial; carried across disconnects.
    backoff: Duration,
    /// Whether the current connection received `verified`.
    verified: bool,
}

impl ReadLoop {
    async fn run(mut self, mut reader: WsReader) {
        loop {
            self.verified = false;
            let connected_at = Instant::now();
            let exit = self.read_until_exit(&mut reader).await;

            if self.verified || connected_at.elapsed() >= STABLE_CONNECTION_PERIOD {
                self.backoff = Duration::ZERO;
            }

            let next = {
                let mut link = self.link.lock().await;
                let next = SessionState::after_read_failure(link.terminating);
                if next == SessionState::Disconnected {
                    // Retire the old socket before anything new is dialed.
                    if let Some(mut writer) = link.writer.take() {
                        let _ = writer.close().await;
                    }
                }
                next
            };

            if next == SessionState::Terminated {
                log::debug!("[RelaySession] Read loop exiting ({:?})", exit);
                break;
            }

            self.state.send_replace(next);
            if let ReadExit::Failed(reason) = &exit {
                log::warn!("[RelaySession] Error during websocket read: {}", reason);
            }

            match self.reconnect().await {
                Some(new_reader) => reader = new_reader,
                None => break,
            }
        }
        self.state.send_replace(SessionState::Terminated);
    }

    async fn read_until_exit(&mut self, reader: &mut WsReader) -> ReadExit {
        loop {
            let message = tokio::select! {
                biased;
                () = self.terminating.cancelled() => return ReadExit::Terminating,
                message = reader.recv() => message,
            };

            match message {
                Some(Ok(WsMessage::Text(text))) => {
                    self.handle_frame(CommandFrame::decode(&text), &text).await;
                }
                Some(Ok(WsMessage::Binary(bytes))) => {
                    let raw = String::from_utf8_lossy(&bytes).into_owned();
                    self.handle_frame(CommandFrame::decode_bytes(&bytes), &raw).await;
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    if let Some(writer) = self.link.lock().await.writer.as_mut() {
                        let _ = writer.send_pong(data).await;
                    }
                }
                Some(Ok(WsMessage::Pong(_))) => {}
                Some(Ok(WsMessage::Close { code, reason })) => {
                    return ReadExit::Failed(format!("closed by server ({code} {reason})"));
                }
                Some(Err(e)) => return ReadExit::Failed(format!("{e:#}")),
                None => return ReadExit::Failed("stream ended".to_string()),
            }
        }
    }

    async fn handle_frame(&mut self, decoded: Result<CommandFrame, FrameError>, raw: &str) {
        let frame = match decoded {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("[RelaySession] Could not decode message: {}, error is: {}", raw, e);
                return;
            }
        };

        match self.dispatcher.dispatch(frame).await {
            DispatchOutcome::Verified => self.verified = true,
            DispatchOutcome::Ignored => {
                log::warn!("[RelaySession] Got unknown message type: {}", raw);
            }
            DispatchOutcome::Completed(report) => {
                if !self.config.acknowledge_commands {
                    return;
                }
                let ack = OutboundFrame::Ack {
                    id: report.id,
                    command: report.command,
                    delivered: report.delivered,
                    failed: report.failures,
                };
                let outbound = Outbound {
                    link: Arc::clone(&self.link),
                };
                if let Err(e) = outbound.send(&ack).await {
                    log::warn!("[RelaySession] Could not send ack: {}", e);
                }
            }
        }
    }

    /// Dial until a new connection is authenticated or shutdown begins.
    ///
    /// Returns `None` when shutdown interrupted the attempt.
    async fn reconnect(&mut self) -> Option<WsReader> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.state.send_replace(SessionState::Reconnecting { attempt });

            if !self.backoff.is_zero() {
                log::info!("[RelaySession] Reconnecting in {:?} (attempt {})", self.backoff, attempt);
                tokio::select! {
                    () = self.terminating.cancelled() => return None,
                    () = tokio::time::sleep(self.backoff) => {}
                }
            }
            // Only a healthy connection resets this; see `run`.
            self.backoff = self.config.reconnect.next_delay(self.backoff);

            let dialed = tokio::select! {
                () = self.terminating.cancelled() => return None,
                dialed = ws::connect(&self.config.endpoint) => dialed,
            };

            let (writer, reader) = match dialed {
                Ok(halves) => halves,
                Err(e) => {
                    log::warn!("[RelaySession] Error reconnecting websocket: {:#}", e);
                    continue;
                }
            };

            self.state.send_replace(SessionState::Authenticating);
            let mut link = self.link.lock().await;
            if link.terminating {
                let mut writer = writer;
                let _ = writer.close().await;
                return None;
            }
            link.writer = Some(writer);
            if let Err(e) = authenticate(&mut link, &self.config.identity_key).await {
                log::warn!("[RelaySession] Handshake after reconnect failed: {:#}", e);
                if let Some(mut writer) = link.writer.take() {
                    let _ = writer.close().await;
                }
                drop(link);
                continue;
            }
            drop(link);

            self.state.send_replace(SessionState::Active);
            log::info!("[RelaySession] Reconnected after {} attempt(s)", attempt);
            return Some(reader);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_failure_without_shutdown_reconnects() {
        assert_eq!(SessionState::after_read_failure(false), SessionState::Disconnected);
    }

    #[test]
    fn test_read_failure_during_shutdown_terminates() {
        assert_eq!(SessionState::after_read_failure(true), SessionState::Terminated);
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let policy = ReconnectPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(5),
        };
        let mut delay = Duration::ZERO;
        let mut seen = Vec::new();
        for _ in 0..5 {
            delay = policy.next_delay(delay);
            seen.push(delay.as_secs());
        }
        assert_eq!(seen, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn test_default_policy_uses_constants() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.initial, RECONNECT_INITIAL_DELAY);
        assert_eq!(policy.max, RECONNECT_MAX_DELAY);
    }

    #[test]
    fn test_relay_config_debug_redacts_key() {
        let config = RelayConfig {
            endpoint: "ws://localhost".to_string(),
            identity_key: "super-secret".to_string(),
            acknowledge_commands: false,
            reconnect: ReconnectPolicy::default(),
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Reconnecting { attempt: 3 }.to_string(), "reconnecting (attempt 3)");
        assert_eq!(SessionState::Active.to_string(), "active");
    }

    #[tokio::test]
    async fn test_outbound_send_without_writer_is_not_connected() {
        let outbound = Outbound {
            link: Arc::new(Mutex::new(Link::default())),
        };
        let err = outbound.send(&OutboundFrame::auth("k")).await.unwrap_err();
        assert_eq!(err, SendError::NotConnected);
    }

    #[tokio::test]
    async fn test_outbound_send_while_terminating_is_refused() {
        let outbound = Outbound {
            link: Arc::new(Mutex::new(Link {
                writer: None,
                terminating: true,
            })),
        };
        let err = outbound.send(&OutboundFrame::auth("k")).await.unwrap_err();
        assert_eq!(err, SendError::Terminating);
    }
}
