//! Transport abstraction traits for roomcast.
//!
//! These traits define the interface that all transport implementations must provide,
//! allowing sessions to be transport-agnostic.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Per-process counter so IDs generated within the same nanosecond differ.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Result of reading from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A complete text message.
    Message(String),
    /// The peer went away (close frame, stream end, or transport error).
    Closed,
}

/// Send half of a connection.
///
/// Sinks are shared: the connection registry holds one per room member and
/// any task may push to it concurrently.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Send an encoded message to the peer.
    async fn send(&self, payload: Arc<str>) -> Result<(), TransportError>;

    /// Check if the peer can still be reached.
    fn is_open(&self) -> bool {
        true
    }
}

/// Read half of an active connection.
///
/// Owned by the single task that runs the connection's session loop.
#[async_trait]
pub trait Connection: Send {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Get a send handle for this connection.
    fn sink(&self) -> Arc<dyn MessageSink>;

    /// Wait for the next inbound message.
    ///
    /// Once this returns [`Received::Closed`] every later call does too.
    async fn recv(&mut self) -> Received;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}
