//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum [`WebSocket`] to the [`Connection`] /
//! [`MessageSink`] split. Outbound traffic goes through a dedicated writer
//! task fed by an unbounded queue, so a broadcast never waits on one slow
//! socket.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::traits::{Connection, ConnectionId, MessageSink, Received, TransportError};

/// A WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    stream: SplitStream<WebSocket>,
    sink: Arc<WebSocketSink>,
    remote_addr: Option<SocketAddr>,
    closed: bool,
}

impl WebSocketConnection {
    /// Wrap an upgraded socket and start its writer task.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(socket: WebSocket, remote_addr: Option<SocketAddr>) -> Self {
        let id = ConnectionId::generate();
        let (mut writer, stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Arc<str>>();
        let is_open = Arc::new(AtomicBool::new(true));

        let writer_open = is_open.clone();
        let writer_id = id.clone();
        tokio::spawn(async move {
            // Runs until every sink handle is dropped or the socket fails.
            while let Some(payload) = rx.recv().await {
                if let Err(e) = writer.send(Message::Text(payload.to_string())).await {
                    debug!(connection = %writer_id, error = %e, "WebSocket write failed");
                    break;
                }
            }
            writer_open.store(false, Ordering::SeqCst);
            let _ = writer.close().await;
            trace!(connection = %writer_id, "WebSocket writer finished");
        });

        Self {
            id,
            stream,
            sink: Arc::new(WebSocketSink { tx, is_open }),
            remote_addr,
            closed: false,
        }
    }

    fn mark_closed(&mut self) -> Received {
        self.closed = true;
        self.sink.is_open.store(false, Ordering::SeqCst);
        Received::Closed
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
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

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Received::Message(text);
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    // Some clients send JSON in binary frames
                    Ok(text) => return Received::Message(text),
                    Err(_) => {
                        debug!(connection = %self.id, "Ignoring non-UTF-8 binary frame");
                    }
                },
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pongs are answered by the protocol layer
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %self.id, "Received close frame");
                    return self.mark_closed();
                }
                Some(Err(e)) => {
                    warn!(connection = %self.id, error = %e, "WebSocket error");
                    return self.mark_closed();
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    return self.mark_closed();
                }
            }
        }
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}

/// Send handle for a WebSocket connection.
pub struct WebSocketSink {
    tx: mpsc::UnboundedSender<Arc<str>>,
    is_open: Arc<AtomicBool>,
}

#[async_trait]
impl MessageSink for WebSocketSink {
    async fn send(&self, payload: Arc<str>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        self.tx
            .send(payload)
            .map_err(|e| TransportError::SendFailed(format!("writer gone: {}", e)))
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}
