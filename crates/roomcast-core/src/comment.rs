//! Comments posted to a room.

use crate::room::RoomId;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use roomcast_protocol::ServerMessage;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for ensuring unique IDs even within the same microsecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a comment ID from its creation time.
#[must_use]
pub fn generate_comment_id(created_at: DateTime<Utc>) -> String {
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", created_at.timestamp_micros(), counter)
}

/// Parse a stored timestamp.
///
/// RFC 3339 is preferred. A timestamp without an offset, as older history
/// files carry, is taken to be UTC.
///
/// # Errors
///
/// Returns an error if `raw` is neither form.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(at) => Ok(at.with_timezone(&Utc)),
        Err(_) => raw
            .parse::<NaiveDateTime>()
            .map(|naive| Utc.from_utc_datetime(&naive)),
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

/// An immutable comment.
///
/// Serialized with the same field names the live channel uses, so stored
/// history and broadcasts look alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Identifier, unique within the room.
    pub id: String,
    /// Room the comment was posted to.
    #[serde(rename = "user_id")]
    pub room_id: RoomId,
    /// Display name of the author, as the client sent it.
    pub nickname: Option<String>,
    /// Cosmetic whisper flag.
    pub whisper: bool,
    /// Trimmed, non-empty body.
    pub text: String,
    /// When the comment was accepted.
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Comment {
    /// Build a comment stamped with the current time.
    ///
    /// Returns `None` if `text` is empty after trimming.
    #[must_use]
    pub fn new(
        room_id: RoomId,
        nickname: Option<String>,
        text: &str,
        whisper: bool,
    ) -> Option<Self> {
        Self::at(room_id, nickname, text, whisper, Utc::now())
    }

    /// Build a comment with an explicit creation time.
    ///
    /// Returns `None` if `text` is empty after trimming.
    #[must_use]
    pub fn at(
        room_id: RoomId,
        nickname: Option<String>,
        text: &str,
        whisper: bool,
        created_at: DateTime<Utc>,
    ) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        Some(Self {
            id: generate_comment_id(created_at),
            room_id,
            nickname,
            whisper,
            text: text.to_string(),
            created_at,
        })
    }
}

impl From<&Comment> for ServerMessage {
    fn from(comment: &Comment) -> Self {
        ServerMessage::Comment {
            id: comment.id.clone(),
            user_id: comment.room_id.to_string(),
            nickname: comment.nickname.clone(),
            whisper: comment.whisper,
            text: comment.text.clone(),
            created_at: comment.created_at,
        }
    }
}
