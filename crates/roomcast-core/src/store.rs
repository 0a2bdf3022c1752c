//! Comment history storage.

use crate::comment::Comment;
use crate::room::RoomId;
use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::trace;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only comment history, one ordered sequence per room.
///
/// `append` must be atomic with respect to other appends to the same room.
#[async_trait]
pub trait CommentStore: Send + Sync {
    /// Persist a comment at the end of the room's history.
    ///
    /// Returns the comment as stored.
    async fn append(&self, room: &RoomId, comment: Comment) -> Result<Comment, StoreError>;

    /// Get the room's history in insertion order.
    async fn list(&self, room: &RoomId) -> Result<Vec<Comment>, StoreError>;
}

/// Volatile store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryCommentStore {
    rooms: DashMap<RoomId, Vec<Comment>>,
}

impl InMemoryCommentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored comments across all rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.iter().map(|e| e.len()).sum()
    }

    /// Check if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CommentStore for InMemoryCommentStore {
    async fn append(&self, room: &RoomId, comment: Comment) -> Result<Comment, StoreError> {
        self.rooms
            .entry(room.clone())
            .or_default()
            .push(comment.clone());
        trace!(room = %room, comment = %comment.id, "Stored comment");
        Ok(comment)
    }

    async fn list(&self, room: &RoomId) -> Result<Vec<Comment>, StoreError> {
        Ok(self
            .rooms
            .get(room)
            .map(|comments| comments.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_and_list_in_order() {
        let store = InMemoryCommentStore::new();
        let alice = RoomId::new("alice").unwrap();

        for text in ["one", "two", "three"] {
            let comment = Comment::new(alice.clone(), None, text, false).unwrap();
            store.append(&alice, comment).await.unwrap();
        }

        let texts: Vec<String> = store
            .list(&alice)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.text)
            .collect();
        assert_eq!(texts, ["one", "two", "three"]);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_list_unknown_room() {
        let store = InMemoryCommentStore::new();
        let nobody = RoomId::new("nobody").unwrap();

        assert!(store.list(&nobody).await.unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_rooms_are_separate() {
        let store = InMemoryCommentStore::new();
        let alice = RoomId::new("alice").unwrap();
        let bob = RoomId::new("bob").unwrap();

        let comment = Comment::new(alice.clone(), None, "hi", false).unwrap();
        store.append(&alice, comment).await.unwrap();

        assert_eq!(store.list(&alice).await.unwrap().len(), 1);
        assert!(store.list(&bob).await.unwrap().is_empty());
    }
}
