//! Message types for the roomcast protocol.
//!
//! Messages are JSON objects discriminated by a `type` field. Inbound and
//! outbound directions have separate types because the server adds fields
//! (ids, timestamps) the client never sends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status relayed when a presence message omits `status`.
pub const DEFAULT_PRESENCE_STATUS: &str = "active";

/// A message sent by a client over a room's live channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Post a comment to the room.
    #[serde(rename = "comment")]
    Comment {
        /// Display name, anonymous when absent.
        #[serde(default)]
        nickname: Option<String>,
        /// Comment body, untrimmed as sent.
        #[serde(default, alias = "comment")]
        text: String,
        /// Cosmetic whisper flag.
        #[serde(default)]
        whisper: bool,
    },

    /// Announce the sender's activity status.
    #[serde(rename = "presence")]
    Presence {
        /// Status label, relayed verbatim.
        #[serde(default)]
        status: Option<String>,
    },

    /// Any tag this server does not understand.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Get the message kind as a static label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Comment { .. } => "comment",
            ClientMessage::Presence { .. } => "presence",
            ClientMessage::Unknown => "unknown",
        }
    }
}

/// A message the server fans out to every member of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// A comment that has been stored.
    #[serde(rename = "comment")]
    Comment {
        /// Comment identifier, unique within the room.
        id: String,
        /// Room the comment belongs to.
        user_id: String,
        /// Display name of the author.
        nickname: Option<String>,
        /// Cosmetic whisper flag.
        whisper: bool,
        /// Trimmed comment body.
        text: String,
        /// When the server accepted the comment.
        created_at: DateTime<Utc>,
    },

    /// A relayed presence update.
    #[serde(rename = "presence")]
    Presence {
        /// Status label exactly as the client sent it.
        status: String,
        /// When the server relayed it.
        at: DateTime<Utc>,
    },
}

impl ServerMessage {
    /// Create a new Presence message.
    #[must_use]
    pub fn presence(status: impl Into<String>, at: DateTime<Utc>) -> Self {
        ServerMessage::Presence {
            status: status.into(),
            at,
        }
    }

    /// Get the message kind as a static label.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Comment { .. } => "comment",
            ServerMessage::Presence { .. } => "presence",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_comment_defaults() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"comment"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Comment {
                nickname: None,
                text: String::new(),
                whisper: false,
            }
        );
    }

    #[test]
    fn test_comment_field_alias() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"comment","comment":"hi","nickname":"bob"}"#).unwrap();
        match msg {
            ClientMessage::Comment { text, nickname, .. } => {
                assert_eq!(text, "hi");
                assert_eq!(nickname.as_deref(), Some("bob"));
            }
            other => panic!("Expected comment, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"typing","extra":1}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unknown);
        assert_eq!(msg.kind(), "unknown");
    }

    #[test]
    fn test_presence_wire_shape() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let value = serde_json::to_value(ServerMessage::presence("idle", at)).unwrap();

        assert_eq!(value["type"], "presence");
        assert_eq!(value["status"], "idle");
        assert_eq!(value["at"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn test_comment_wire_shape_keeps_null_nickname() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let msg = ServerMessage::Comment {
            id: "c1".to_string(),
            user_id: "alice".to_string(),
            nickname: None,
            whisper: true,
            text: "hello".to_string(),
            created_at: at,
        };
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "comment");
        assert_eq!(value["user_id"], "alice");
        assert!(value["nickname"].is_null());
        assert_eq!(value["whisper"], true);
        assert_eq!(value["created_at"], "2024-05-01T12:00:00Z");
    }
}
