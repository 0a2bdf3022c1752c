//! # roomcast-protocol
//!
//! Wire protocol definitions for the roomcast room messaging service.
//!
//! Every message on a room's live channel is a JSON object tagged by its
//! `type` field.
//!
//! ## Message Types
//!
//! - `comment` - Chat comment, persisted and broadcast to the room
//! - `presence` - Activity status (`active` / `idle` / `sleep`), relayed only
//!
//! Unknown tags decode to [`ClientMessage::Unknown`] so newer clients can
//! talk to older servers.
//!
//! ## Example
//!
//! ```rust
//! use roomcast_protocol::{codec, ClientMessage};
//!
//! let msg = codec::decode(r#"{"type":"presence","status":"idle"}"#).unwrap();
//! assert_eq!(
//!     msg,
//!     ClientMessage::Presence { status: Some("idle".to_string()) }
//! );
//! ```

pub mod codec;
pub mod messages;

pub use codec::{decode, encode, ProtocolError};
pub use messages::{ClientMessage, ServerMessage, DEFAULT_PRESENCE_STATUS};
