//! In-process transport.
//!
//! A [`MemoryConnection`] and its [`MemoryPeer`] are joined by a pair of
//! unbounded channels. The peer plays the remote client: it feeds inbound
//! text and observes everything the server sends. Dropping or closing the peer
//! looks like a disconnect from the server's side.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

use crate::traits::{Connection, ConnectionId, MessageSink, Received, TransportError};

/// Create a connected pair.
#[must_use]
pub fn pair(id: impl Into<ConnectionId>) -> (MemoryConnection, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let connection = MemoryConnection {
        id: id.into(),
        inbound: inbound_rx,
        sink: Arc::new(MemorySink { tx: outbound_tx }),
        closed: false,
    };
    let peer = MemoryPeer {
        inbound: Some(inbound_tx),
        outbound: outbound_rx,
    };

    (connection, peer)
}

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    inbound: mpsc::UnboundedReceiver<String>,
    sink: Arc<MemorySink>,
    closed: bool,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn sink(&self) -> Arc<dyn MessageSink> {
        self.sink.clone()
    }

    async fn recv(&mut self) -> Received {
        if self.closed {
            return Received::Closed;
        }

        match self.inbound.recv().await {
            Some(text) => Received::Message(text),
            None => {
                self.closed = true;
                Received::Closed
            }
        }
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

/// Send handle for an in-memory connection.
#[derive(Debug, Clone)]
pub struct MemorySink {
    tx: mpsc::UnboundedSender<Arc<str>>,
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&self, payload: Arc<str>) -> Result<(), TransportError> {
        trace!(bytes = payload.len(), "Memory send");
        self.tx
            .send(payload)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<String>>,
    outbound: mpsc::UnboundedReceiver<Arc<str>>,
}

impl MemoryPeer {
    /// Send text to the server side.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer was closed or the server side is gone.
    pub fn send(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.inbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(text.into())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Wait for the next message sent by the server.
    ///
    /// Returns `None` once the server side has dropped every send handle.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.outbound.recv().await
    }

    /// Take a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        self.outbound.try_recv().ok()
    }

    /// Half-close: the server sees [`Received::Closed`] after any queued input,
    /// but this peer can still observe outbound messages.
    pub fn close(&mut self) {
        self.inbound = None;
    }
}
