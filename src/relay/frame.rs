//! Control API wire frames.
//!
//! Every frame is a JSON object discriminated by its `type` field.
//!
//! Inbound (control API → relay):
//!
//! ```json
//! {"type": "verified"}
//! {"type": "create", "id": "3EB0C4", "content": "<p>hello</p>"}
//! {"type": "delete", "id": "3EB0C4"}
//! ```
//!
//! Outbound (relay → control API):
//!
//! ```json
//! {"type": "code", "code": "<identity key>"}
//! {"type": "message", "id": "...", "chat": "...", "sender": "...", "text": "...", "timestamp": "..."}
//! {"type": "ack", "id": "3EB0C4", "command": "create", "delivered": 2, "failed": []}
//! ```

use serde::{Deserialize, Serialize};

use crate::chat::ChatEvent;

/// A decoded inbound command.
///
/// Unrecognized `type` values decode to [`CommandFrame::Unknown`] rather
/// than failing, so new server-side frame types never stall the relay.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CommandFrame {
    /// The control API accepted our identity key.
    Verified,
    /// Send a new message to every configured recipient.
    Create {
        /// Client-assigned message id, reused for every recipient.
        id: String,
        /// Message body as rich-text HTML.
        content: String,
    },
    /// Revoke a previously created message from every configured recipient.
    Delete {
        /// Id given in the original `create`.
        id: String,
    },
    /// Any other `type`.
    #[serde(other)]
    Unknown,
}

/// Why an inbound frame could not be decoded.
#[derive(Debug)]
pub enum FrameError {
    /// Binary payload that is not UTF-8.
    NotUtf8,
    /// Valid JSON, but not an object with a string `type` field.
    MissingType,
    /// Not JSON, or a known `type` without its required fields.
    Malformed(serde_json::Error),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotUtf8 => write!(f, "frame is not valid UTF-8"),
            Self::MissingType => write!(f, "frame has no string \"type\" field"),
            Self::Malformed(e) => write!(f, "malformed frame: {e}"),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NotUtf8 | Self::MissingType => None,
            Self::Malformed(e) => Some(e),
        }
    }
}

impl CommandFrame {
    /// Decode a text frame.
    ///
    /// The `type` field is checked before variant decoding so that numeric
    /// or array payloads never map onto a variant by position.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: serde_json::Value = serde_json::from_str(text).map_err(FrameError::Malformed)?;
        if !value.get("type").is_some_and(serde_json::Value::is_string) {
            return Err(FrameError::MissingType);
        }
        serde_json::from_value(value).map_err(FrameError::Malformed)
    }

    /// Decode a binary frame carrying UTF-8 JSON.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(bytes).map_err(|_| FrameError::NotUtf8)?;
        Self::decode(text)
    }
}

/// Which command an acknowledgement refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// A `create` command.
    Create,
    /// A `delete` command.
    Delete,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// One recipient a command could not be applied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientFailure {
    /// Recipient identity as configured.
    pub recipient: String,
    /// Human-readable reason.
    pub error: String,
}

/// A frame sent to the control API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    /// Handshake carrying the identity key, sent once per connection.
    Code {
        /// Pre-shared identity key.
        code: String,
    },
    /// Inbound chat message forwarded to the control API.
    Message(ChatEvent),
    /// Outcome of a `create` or `delete`.
    Ack {
        /// Command id.
        id: String,
        /// Which command ran.
        command: CommandKind,
        /// Recipients the command succeeded for.
        delivered: usize,
        /// Recipients it failed for.
        failed: Vec<RecipientFailure>,
    },
}

impl OutboundFrame {
    /// Build the handshake frame.
    pub fn auth(identity_key: &str) -> Self {
        Self::Code {
            code: identity_key.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decode_verified() {
        assert_eq!(CommandFrame::decode(r#"{"type":"verified"}"#).unwrap(), CommandFrame::Verified);
    }

    #[test]
    fn test_decode_create() {
        let frame = CommandFrame::decode(r#"{"type":"create","id":"42","content":"<p>hi</p>"}"#).unwrap();
        assert_eq!(
            frame,
            CommandFrame::Create {
                id: "42".to_string(),
                content: "<p>hi</p>".to_string()
            }
        );
    }

    #[test]
    fn test_decode_delete_ignores_extra_fields() {
        let frame = CommandFrame::decode(r#"{"type":"delete","id":"42","content":"ignored","x":1}"#).unwrap();
        assert_eq!(frame, CommandFrame::Delete { id: "42".to_string() });
    }

    #[test]
    fn test_decode_unknown_type() {
        let frame = CommandFrame::decode(r#"{"type":"edit","id":"42"}"#).unwrap();
        assert_eq!(frame, CommandFrame::Unknown);
    }

    #[test]
    fn test_decode_failures() {
        assert!(matches!(CommandFrame::decode("not json"), Err(FrameError::Malformed(_))));
        for text in ["[1,2,3]", "null", r#""verified""#, r#"{"id":"42"}"#, r#"{"type":0}"#] {
            assert!(
                matches!(CommandFrame::decode(text), Err(FrameError::MissingType)),
                "expected missing type for {text}"
            );
        }
        for text in [
            r#"{"type":"create","id":"42"}"#,
            r#"{"type":"delete"}"#,
            r#"{"type":"create","id":42,"content":"x"}"#,
        ] {
            assert!(
                matches!(CommandFrame::decode(text), Err(FrameError::Malformed(_))),
                "expected decode failure for {text}"
            );
        }
    }

    #[test]
    fn test_decode_bytes() {
        assert_eq!(CommandFrame::decode_bytes(br#"{"type":"verified"}"#).unwrap(), CommandFrame::Verified);
        assert!(matches!(CommandFrame::decode_bytes(&[0xff, 0xfe]), Err(FrameError::NotUtf8)));
    }

    #[test]
    fn test_auth_frame_wire_format() {
        let value = serde_json::to_value(OutboundFrame::auth("secret")).unwrap();
        assert_eq!(value, json!({"type": "code", "code": "secret"}));
    }

    #[test]
    fn test_ack_frame_wire_format() {
        let frame = OutboundFrame::Ack {
            id: "42".to_string(),
            command: CommandKind::Delete,
            delivered: 1,
            failed: vec![RecipientFailure {
                recipient: "bad".to_string(),
                error: "no server".to_string(),
            }],
        };
        assert_eq!(
            serde_json::to_value(frame).unwrap(),
            json!({
                "type": "ack",
                "id": "42",
                "command": "delete",
                "delivered": 1,
                "failed": [{"recipient": "bad", "error": "no server"}]
            })
        );
    }

    #[test]
    fn test_message_frame_wire_format() {
        let event = ChatEvent {
            id: "M1".to_string(),
            chat: "1@g.us".to_string(),
            sender: "2@s.whatsapp.net".to_string(),
            text: "hello".to_string(),
            timestamp: chrono::Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        };
        let value = serde_json::to_value(OutboundFrame::Message(event)).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["id"], "M1");
        assert_eq!(value["chat"], "1@g.us");
        assert_eq!(value["sender"], "2@s.whatsapp.net");
        assert_eq!(value["text"], "hello");
        assert_eq!(value["timestamp"], "2026-01-02T03:04:05Z");
    }
}
