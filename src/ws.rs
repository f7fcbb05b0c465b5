//! WebSocket transport for the control API.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves. The relay session holds the writer behind its link
//! mutex and hands the reader to its background read loop.
//!
//! # Architecture
//!
//! [`connect`] dials the endpoint and returns a ([`WsWriter`], [`WsReader`])
//! pair. The writer speaks JSON frames plus the control frames the relay
//! needs (pong, normal-closure close); the reader yields [`WsMessage`]s with
//! tungstenite's raw frame variants filtered out.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Received WebSocket message.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Serialize `frame` as JSON and send it as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the send fails.
    pub async fn send_json<T: Serialize + ?Sized>(&mut self, frame: &T) -> Result<()> {
        let text = serde_json::to_string(frame).context("failed to encode frame")?;
        self.sink
            .send(tungstenite::Message::Text(text))
            .await
            .context("WebSocket send failed")
    }

    /// Send a pong frame in response to a ping.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Pong(data))
            .await
            .context("WebSocket send_pong failed")
    }

    /// Send a normal-closure (1000) close frame carrying `reason`.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_close(&mut self, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: reason.to_string().into(),
        };
        self.sink
            .send(tungstenite::Message::Close(Some(frame)))
            .await
            .context("WebSocket send_close failed")
    }

    /// Flush pending writes and close the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if closing fails.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(anyhow::anyhow!("WebSocket read error: {e}"))),
            };
            return Some(Ok(match message {
                tungstenite::Message::Text(text) => WsMessage::Text(text),
                tungstenite::Message::Binary(data) => WsMessage::Binary(data),
                tungstenite::Message::Ping(data) => WsMessage::Ping(data),
                tungstenite::Message::Pong(data) => WsMessage::Pong(data),
                tungstenite::Message::Close(close_frame) => {
                    let (code, reason) = close_frame
                        .map_or((1005, String::new()), |cf| (cf.code.into(), cf.reason.to_string()));
                    WsMessage::Close { code, reason }
                }
                // Raw frames are only produced when writing; skip.
                tungstenite::Message::Frame(_) => continue,
            }));
        }
    }
}

/// Dial a WebSocket endpoint.
///
/// Returns split (writer, reader) halves for independent use by the writer
/// owner and the read loop.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the WebSocket handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .with_context(|| format!("WebSocket connect to {url} failed"))?;

    let (sink, stream) = ws_stream.split();

    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Normalize a configured control API endpoint to a `ws://` or `wss://` URL.
///
/// `http://` and `https://` are rewritten to their WebSocket counterparts;
/// `ws://` and `wss://` pass through. Anything else is rejected.
///
/// # Errors
///
/// Returns an error for empty URLs and unsupported schemes.
pub fn normalize_endpoint(url: &str) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        anyhow::bail!("endpoint URL is empty");
    }

    let normalized = if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        anyhow::bail!("unsupported endpoint scheme in {url:?} (expected ws, wss, http or https)");
    };

    if normalized.ends_with("://") {
        anyhow::bail!("endpoint URL {url:?} has no host");
    }
    Ok(normalized)
}
