//! Per-connection protocol loop.
//!
//! A [`RoomSession`] owns the read half of one connection for its whole life:
//!
//! ```text
//! Connecting ──join──▶ Joined ──Closed──▶ Closed
//!                       │  ▲
//!                       └──┘ comment / presence / ignored
//! ```
//!
//! Reading is the only suspension point of the loop. Messages from one
//! connection are handled strictly in arrival order, and every broadcast in a
//! room goes through the room's sequencer so members observe one order.

use crate::broadcast::BroadcastEngine;
use crate::comment::Comment;
use crate::presence::PresenceStatus;
use crate::room::RoomId;
use crate::store::{CommentStore, StoreError};
use chrono::Utc;
use roomcast_protocol::{
    codec, ClientMessage, ProtocolError, ServerMessage, DEFAULT_PRESENCE_STATUS,
};
use roomcast_transport::{Connection, Received};
use metrics::counter;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Counter of inbound messages, labelled by `outcome`
/// (`comment`, `presence`, `ignored`, `rejected`).
pub const MESSAGES_TOTAL: &str = "roomcast_messages_total";

/// Errors that reject a single inbound message.
///
/// None of these end the session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The comment could not be stored; nothing was broadcast.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The outbound message could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted but not yet registered.
    Connecting,
    /// Registered and reading.
    Joined,
    /// Deregistered; terminal.
    Closed,
}

/// Counters collected over a session's life.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Comments stored and broadcast.
    pub comments: usize,
    /// Presence updates relayed.
    pub presence: usize,
    /// Messages dropped as malformed, unknown or blank.
    pub ignored: usize,
    /// Messages rejected by a store or encoding failure.
    pub rejected: usize,
    /// Members dropped because a broadcast to them failed.
    pub delivery_failures: usize,
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handled {
    Comment { failed: usize },
    Presence { failed: usize },
    Ignored,
}

/// Protocol loop for a single connection in a single room.
pub struct RoomSession<C> {
    room: RoomId,
    connection: C,
    engine: BroadcastEngine,
    store: Arc<dyn CommentStore>,
    state: SessionState,
    summary: SessionSummary,
}

impl<C: Connection> RoomSession<C> {
    /// Create a session for an accepted connection.
    #[must_use]
    pub fn new(
        room: RoomId,
        connection: C,
        engine: BroadcastEngine,
        store: Arc<dyn CommentStore>,
    ) -> Self {
        Self {
            room,
            connection,
            engine,
            store,
            state: SessionState::Connecting,
            summary: SessionSummary::default(),
        }
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Get the room this session belongs to.
    #[must_use]
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Run until the connection closes.
    ///
    /// The connection is deregistered exactly once on the way out.
    pub async fn run(mut self) -> SessionSummary {
        self.join();

        loop {
            match self.connection.recv().await {
                Received::Message(text) => self.handle_text(&text).await,
                Received::Closed => break,
            }
        }

        self.close();
        self.summary
    }

    /// Register the connection in its room.
    ///
    /// [`run`](Self::run) calls this itself; calling it earlier lets the
    /// caller observe the new membership before the loop starts.
    pub fn join(&mut self) {
        if self.state != SessionState::Connecting {
            return;
        }

        let id = self.connection.id().clone();
        self.engine
            .registry()
            .join(&self.room, id.clone(), self.connection.sink());
        self.state = SessionState::Joined;

        debug!(
            room = %self.room,
            connection = %id,
            remote = ?self.connection.remote_addr(),
            "Session joined"
        );
    }

    fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        self.engine
            .registry()
            .leave(&self.room, self.connection.id());
        self.state = SessionState::Closed;

        debug!(
            room = %self.room,
            connection = %self.connection.id(),
            summary = ?self.summary,
            "Session closed"
        );
    }

    async fn handle_text(&mut self, text: &str) {
        let outcome = match self.dispatch(text).await {
            Ok(Handled::Comment { failed }) => {
                self.summary.comments += 1;
                self.summary.delivery_failures += failed;
                "comment"
            }
            Ok(Handled::Presence { failed }) => {
                self.summary.presence += 1;
                self.summary.delivery_failures += failed;
                "presence"
            }
            Ok(Handled::Ignored) => {
                self.summary.ignored += 1;
                "ignored"
            }
            Err(e) => {
                warn!(
                    room = %self.room,
                    connection = %self.connection.id(),
                    error = %e,
                    "Message rejected"
                );
                self.summary.rejected += 1;
                "rejected"
            }
        };

        counter!(MESSAGES_TOTAL, "outcome" => outcome).increment(1);
    }

    async fn dispatch(&mut self, text: &str) -> Result<Handled, SessionError> {
        let message = match codec::decode(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(connection = %self.connection.id(), error = %e, "Ignoring malformed message");
                return Ok(Handled::Ignored);
            }
        };

        trace!(connection = %self.connection.id(), kind = message.kind(), "Received");

        match message {
            ClientMessage::Comment {
                nickname,
                text,
                whisper,
            } => self.handle_comment(nickname, &text, whisper).await,
            ClientMessage::Presence { status } => self.handle_presence(status).await,
            ClientMessage::Unknown => {
                debug!(connection = %self.connection.id(), "Ignoring unknown message type");
                Ok(Handled::Ignored)
            }
        }
    }

    async fn handle_comment(
        &mut self,
        nickname: Option<String>,
        text: &str,
        whisper: bool,
    ) -> Result<Handled, SessionError> {
        let _order = self.engine.sequence(&self.room).await;

        let Some(comment) = Comment::new(self.room.clone(), nickname, text, whisper) else {
            debug!(connection = %self.connection.id(), "Ignoring blank comment");
            return Ok(Handled::Ignored);
        };

        // Store first: a comment is only broadcast once it is in the history
        let stored = self.store.append(&self.room, comment).await?;
        let report = self
            .engine
            .deliver(&self.room, &ServerMessage::from(&stored))
            .await?;

        debug!(
            room = %self.room,
            comment = %stored.id,
            recipients = report.delivered,
            "Comment broadcast"
        );

        Ok(Handled::Comment {
            failed: report.failed.len(),
        })
    }

    async fn handle_presence(&mut self, status: Option<String>) -> Result<Handled, SessionError> {
        let status = status.unwrap_or_else(|| DEFAULT_PRESENCE_STATUS.to_string());
        if status.parse::<PresenceStatus>().is_err() {
            debug!(connection = %self.connection.id(), status = %status, "Relaying non-standard presence status");
        }

        let _order = self.engine.sequence(&self.room).await;
        let report = self
            .engine
            .deliver(&self.room, &ServerMessage::presence(status, Utc::now()))
            .await?;

        Ok(Handled::Presence {
            failed: report.failed.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionRegistry;
    use crate::store::InMemoryCommentStore;
    use async_trait::async_trait;
    use roomcast_transport::memory::{self, MemoryPeer};
    use roomcast_transport::ConnectionId;
    use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use tokio::task::JoinHandle;

    /// Recorder that keeps counters as `name{label=value}` strings.
    #[derive(Default)]
    struct CountingRecorder {
        counters: Mutex<HashMap<String, Arc<AtomicU64>>>,
    }

    impl CountingRecorder {
        fn count(&self, key: &str) -> u64 {
            self.counters
                .lock()
                .unwrap()
                .get(key)
                .map_or(0, |c| c.load(Ordering::SeqCst))
        }
    }

    impl Recorder for CountingRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            let labels: Vec<String> = key
                .labels()
                .map(|l| format!("{}={}", l.key(), l.value()))
                .collect();
            let name = format!("{}{{{}}}", key.name(), labels.join(","));
            let cell = self.counters.lock().unwrap().entry(name).or_default().clone();
            Counter::from_arc(cell)
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    /// Store that refuses every write.
    struct FailingStore;

    #[async_trait]
    impl CommentStore for FailingStore {
        async fn append(&self, _room: &RoomId, _comment: Comment) -> Result<Comment, StoreError> {
            Err(StoreError::Unavailable("disk full".to_string()))
        }

        async fn list(&self, _room: &RoomId) -> Result<Vec<Comment>, StoreError> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        engine: BroadcastEngine,
        store: Arc<dyn CommentStore>,
    }

    impl Harness {
        fn new(store: Arc<dyn CommentStore>) -> Self {
            Self {
                engine: BroadcastEngine::new(Arc::new(ConnectionRegistry::new())),
                store,
            }
        }

        fn registry(&self) -> &ConnectionRegistry {
            self.engine.registry()
        }

        /// Register a session and start its loop.
        async fn connect(&self, room: &str, id: &str) -> (MemoryPeer, JoinHandle<SessionSummary>) {
            let room = RoomId::new(room).unwrap();
            let (conn, peer) = memory::pair(id);
            let mut session =
                RoomSession::new(room.clone(), conn, self.engine.clone(), self.store.clone());
            assert_eq!(session.state(), SessionState::Connecting);

            session.join();
            assert_eq!(session.state(), SessionState::Joined);
            assert!(self.registry().contains(&room, &ConnectionId::new(id)));

            (peer, tokio::spawn(session.run()))
        }
    }

    async fn next_json(peer: &mut MemoryPeer) -> Value {
        let text = peer.recv().await.expect("peer channel closed");
        serde_json::from_str(&text).unwrap()
    }

    /// Send a sentinel presence and wait for it, so everything sent before
    /// it has been fully processed.
    async fn flush(peer: &mut MemoryPeer) -> Vec<Value> {
        peer.send(r#"{"type":"presence","status":"flush"}"#).unwrap();
        let mut seen = Vec::new();
        loop {
            let value = next_json(peer).await;
            if value["status"] == "flush" {
                return seen;
            }
            seen.push(value);
        }
    }

    #[tokio::test]
    async fn test_comment_is_trimmed_stored_and_broadcast_to_sender() {
        let store = Arc::new(InMemoryCommentStore::new());
        let harness = Harness::new(store.clone());
        let (mut sender, _h1) = harness.connect("alice", "conn-1").await;
        let (mut other, _h2) = harness.connect("alice", "conn-2").await;

        sender
            .send(r#"{"type":"comment","text":"  hello  ","nickname":"bob","whisper":false}"#)
            .unwrap();

        let to_sender = next_json(&mut sender).await;
        let to_other = next_json(&mut other).await;

        assert_eq!(to_sender, to_other);
        assert_eq!(to_sender["type"], "comment");
        assert_eq!(to_sender["text"], "hello");
        assert_eq!(to_sender["nickname"], "bob");
        assert_eq!(to_sender["whisper"], false);
        assert_eq!(to_sender["user_id"], "alice");
        assert!(to_sender["id"].is_string());
        assert!(to_sender["created_at"].is_string());

        let history = store.list(&RoomId::new("alice").unwrap()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "hello");
        assert_eq!(to_sender["id"], history[0].id.as_str());
    }

    #[tokio::test]
    async fn test_blank_comment_is_dropped() {
        let store = Arc::new(InMemoryCommentStore::new());
        let harness = Harness::new(store.clone());
        let (mut peer, handle) = harness.connect("alice", "conn-1").await;

        peer.send(r#"{"type":"comment","text":"   "}"#).unwrap();
        let seen = flush(&mut peer).await;

        assert!(seen.is_empty());
        assert!(store.is_empty());

        peer.close();
        let summary = handle.await.unwrap();
        assert_eq!(summary.ignored, 1);
        assert_eq!(summary.comments, 0);
    }

    #[tokio::test]
    async fn test_presence_is_relayed_without_storage() {
        let store = Arc::new(InMemoryCommentStore::new());
        let harness = Harness::new(store.clone());
        let (mut sender, _h1) = harness.connect("alice", "conn-1").await;
        let (mut other, _h2) = harness.connect("alice", "conn-2").await;

        sender.send(r#"{"type":"presence","status":"idle"}"#).unwrap();

        for peer in [&mut sender, &mut other] {
            let value = next_json(peer).await;
            assert_eq!(value["type"], "presence");
            assert_eq!(value["status"], "idle");
            assert!(value["at"].is_string());
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_presence_defaults_to_active() {
        let harness = Harness::new(Arc::new(InMemoryCommentStore::new()));
        let (mut peer, _handle) = harness.connect("alice", "conn-1").await;

        peer.send(r#"{"type":"presence"}"#).unwrap();

        let value = next_json(&mut peer).await;
        assert_eq!(value["status"], "active");
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_messages_are_ignored() {
        let harness = Harness::new(Arc::new(InMemoryCommentStore::new()));
        let (mut peer, handle) = harness.connect("alice", "conn-1").await;

        peer.send(r#"{"type":"typing"}"#).unwrap();
        peer.send("{not json").unwrap();
        peer.send(r#"{"type":"comment","text":42}"#).unwrap();
        let seen = flush(&mut peer).await;

        assert!(seen.is_empty());
        assert!(harness
            .registry()
            .contains(&RoomId::new("alice").unwrap(), &ConnectionId::new("conn-1")));

        peer.close();
        let summary = handle.await.unwrap();
        assert_eq!(summary.ignored, 3);
        assert_eq!(summary.presence, 1);
    }

    #[tokio::test]
    async fn test_store_failure_blocks_broadcast_but_keeps_connection() {
        let harness = Harness::new(Arc::new(FailingStore));
        let (mut sender, handle) = harness.connect("alice", "conn-1").await;
        let (mut other, _h2) = harness.connect("alice", "conn-2").await;

        sender.send(r#"{"type":"comment","text":"lost"}"#).unwrap();
        let seen = flush(&mut sender).await;

        assert!(seen.is_empty());
        // Only the flush presence reached the other member
        let value = next_json(&mut other).await;
        assert_eq!(value["type"], "presence");
        assert!(other.try_recv().is_none());

        sender.close();
        let summary = handle.await.unwrap();
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.comments, 0);
    }

    #[tokio::test]
    async fn test_room_isolation() {
        let harness = Harness::new(Arc::new(InMemoryCommentStore::new()));
        let (mut a1, _h1) = harness.connect("alice", "conn-1").await;
        let (mut a2, _h2) = harness.connect("alice", "conn-2").await;
        let (mut b1, _h3) = harness.connect("bob", "conn-3").await;

        a1.send(r#"{"type":"comment","text":"for alice"}"#).unwrap();

        assert_eq!(next_json(&mut a1).await["text"], "for alice");
        assert_eq!(next_json(&mut a2).await["text"], "for alice");

        let seen = flush(&mut b1).await;
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_deregisters_exactly_once() {
        let harness = Harness::new(Arc::new(InMemoryCommentStore::new()));
        let alice = RoomId::new("alice").unwrap();
        let (mut p1, h1) = harness.connect("alice", "conn-1").await;
        let (_p2, _h2) = harness.connect("alice", "conn-2").await;

        assert_eq!(harness.registry().member_count(&alice), 2);

        p1.close();
        h1.await.unwrap();

        assert!(!harness.registry().contains(&alice, &ConnectionId::new("conn-1")));
        assert_eq!(harness.registry().member_count(&alice), 1);
    }

    #[tokio::test]
    async fn test_last_disconnect_removes_room() {
        let harness = Harness::new(Arc::new(InMemoryCommentStore::new()));
        let alice = RoomId::new("alice").unwrap();
        let (mut peer, handle) = harness.connect("alice", "conn-1").await;

        peer.close();
        handle.await.unwrap();

        assert!(!harness.registry().room_exists(&alice));
        assert_eq!(harness.registry().stats().room_count, 0);
    }

    #[tokio::test]
    async fn test_dead_member_is_dropped_on_broadcast() {
        let harness = Harness::new(Arc::new(InMemoryCommentStore::new()));
        let alice = RoomId::new("alice").unwrap();
        let (mut sender, handle) = harness.connect("alice", "conn-1").await;
        let (dead, _h2) = harness.connect("alice", "conn-2").await;
        let (mut alive, _h3) = harness.connect("alice", "conn-3").await;

        // Dropping the peer kills both directions; the dead session may or
        // may not have noticed before the broadcast
        drop(dead);
        sender.send(r#"{"type":"comment","text":"anyone?"}"#).unwrap();

        assert_eq!(next_json(&mut sender).await["text"], "anyone?");
        assert_eq!(next_json(&mut alive).await["text"], "anyone?");

        let _ = flush(&mut sender).await;
        assert!(!harness.registry().contains(&alice, &ConnectionId::new("conn-2")));
        assert_eq!(harness.registry().member_count(&alice), 2);

        sender.close();
        let summary = handle.await.unwrap();
        assert_eq!(summary.comments, 1);
    }

    #[tokio::test]
    async fn test_comments_from_one_connection_keep_order() {
        let store = Arc::new(InMemoryCommentStore::new());
        let harness = Harness::new(store.clone());
        let (mut sender, _h1) = harness.connect("alice", "conn-1").await;
        let (mut other, _h2) = harness.connect("alice", "conn-2").await;

        for i in 0..20 {
            sender
                .send(format!(r#"{{"type":"comment","text":"m{}"}}"#, i))
                .unwrap();
        }

        let mut received = Vec::new();
        for _ in 0..20 {
            received.push(next_json(&mut other).await["text"].as_str().unwrap().to_string());
        }
        let expected: Vec<String> = (0..20).map(|i| format!("m{}", i)).collect();
        assert_eq!(received, expected);

        let stored: Vec<String> = store
            .list(&RoomId::new("alice").unwrap())
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.text)
            .collect();
        assert_eq!(stored, expected);
    }

    #[test]
    fn test_outcomes_are_counted_while_connected() {
        let recorder = CountingRecorder::default();

        metrics::with_local_recorder(&recorder, || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let harness = Harness::new(Arc::new(InMemoryCommentStore::new()));
                let (mut peer, _handle) = harness.connect("alice", "conn-1").await;

                peer.send(r#"{"type":"comment","text":"hi"}"#).unwrap();
                peer.send("{not json").unwrap();
                assert_eq!(flush(&mut peer).await.len(), 1);

                assert_eq!(recorder.count("roomcast_messages_total{outcome=comment}"), 1);
                assert_eq!(recorder.count("roomcast_messages_total{outcome=ignored}"), 1);
            });
        });
    }
}
