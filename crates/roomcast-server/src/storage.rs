//! JSON-file comment store.
//!
//! Each room's history lives in `<data_dir>/<key>_comments.json` as a
//! pretty-printed JSON array. An append rewrites the whole file through a
//! temporary file and a rename, so readers never see a partial write.
//!
//! The key is the room id with every byte outside `[A-Za-z0-9._-]`
//! percent-encoded, so plain ids name their file verbatim. Keys that would
//! overflow the file name limit become `%sha256-<hex digest of the id>`;
//! encoding never yields `%s`, so the two forms cannot collide.

use async_trait::async_trait;
use dashmap::DashMap;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use roomcast_core::{Comment, CommentStore, RoomId, StoreError};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const FILE_SUFFIX: &str = "_comments.json";
const TMP_SUFFIX: &str = ".tmp";

/// Longest file name most filesystems accept.
const MAX_FILE_NAME: usize = 255;

/// Longest key that still fits the temporary file name.
pub const MAX_FILE_KEY: usize = MAX_FILE_NAME - FILE_SUFFIX.len() - TMP_SUFFIX.len();

/// Bytes escaped in file keys.
const FILE_KEY: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// Map a room id to the file-name-safe key its history is stored under.
#[must_use]
pub fn file_key(room: &RoomId) -> String {
    let key = utf8_percent_encode(room.as_str(), FILE_KEY).to_string();
    if key.len() <= MAX_FILE_KEY {
        key
    } else {
        format!("%sha256-{}", hex::encode(Sha256::digest(room.as_str().as_bytes())))
    }
}

/// Comment store backed by one JSON file per room.
pub struct JsonFileCommentStore {
    data_dir: PathBuf,
    /// Serializes read-modify-write per room.
    write_locks: DashMap<RoomId, Arc<Mutex<()>>>,
}

impl JsonFileCommentStore {
    /// Open a store rooted at `data_dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;
        info!("Comment store at {}", data_dir.display());

        Ok(Self {
            data_dir,
            write_locks: DashMap::new(),
        })
    }

    /// Get the history file for a room.
    #[must_use]
    pub fn room_file(&self, room: &RoomId) -> PathBuf {
        self.data_dir.join(format!("{}{}", file_key(room), FILE_SUFFIX))
    }

    fn write_lock(&self, room: &RoomId) -> Arc<Mutex<()>> {
        self.write_locks.entry(room.clone()).or_default().clone()
    }

    async fn read_room(&self, room: &RoomId) -> Result<Vec<Comment>, StoreError> {
        match tokio::fs::read(self.room_file(room)).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CommentStore for JsonFileCommentStore {
    async fn append(&self, room: &RoomId, comment: Comment) -> Result<Comment, StoreError> {
        let lock = self.write_lock(room);
        let _guard = lock.lock().await;

        let mut comments = self.read_room(room).await?;
        comments.push(comment.clone());

        let path = self.room_file(room);
        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_SUFFIX);
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&comments)?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(room = %room, comment = %comment.id, total = comments.len(), "Stored comment");
        Ok(comment)
    }

    async fn list(&self, room: &RoomId) -> Result<Vec<Comment>, StoreError> {
        self.read_room(room).await
    }
}
