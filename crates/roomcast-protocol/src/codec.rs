//! Codec for encoding and decoding roomcast messages.
//!
//! Messages travel as UTF-8 JSON text, one message per transport frame.

use thiserror::Error;

use crate::messages::{ClientMessage, ServerMessage};

/// Maximum inbound message size (64 KiB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode an inbound client message.
///
/// Unknown `type` tags decode successfully to [`ClientMessage::Unknown`].
///
/// # Errors
///
/// Returns an error if the text is too large or is not a valid message object.
pub fn decode(text: &str) -> Result<ClientMessage, ProtocolError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(text.len()));
    }

    Ok(serde_json::from_str(text)?)
}

/// Encode an outbound server message to JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(message: &ServerMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}
