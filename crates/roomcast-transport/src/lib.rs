//! # roomcast-transport
//!
//! Transport abstraction layer for roomcast.
//!
//! A live connection is split in two halves:
//!
//! - [`Connection`] - the read side, owned by exactly one session task
//! - [`MessageSink`] - a cheap, shareable send handle the connection registry
//!   keeps while the connection is a room member
//!
//! Reading yields a tagged [`Received`] value, so a disconnect is an ordinary
//! branch in the session loop rather than an error path.
//!
//! ```rust,ignore
//! use roomcast_transport::{Connection, Received};
//!
//! async fn handle_connection(mut conn: impl Connection) {
//!     while let Received::Message(text) = conn.recv().await {
//!         // Process message
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connection, ConnectionId, MessageSink, Received, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
