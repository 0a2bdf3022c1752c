//! Connection registry for roomcast.
//!
//! The registry maps each room to the set of live connections in it. It holds
//! only send handles; the connections themselves are owned by their session
//! tasks.

use crate::room::RoomId;
use dashmap::DashMap;
use roomcast_transport::{ConnectionId, MessageSink};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A room member as seen by the registry.
#[derive(Clone)]
pub struct Member {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Send handle for the connection.
    pub sink: Arc<dyn MessageSink>,
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member")
            .field("id", &self.id)
            .field("open", &self.sink.is_open())
            .finish()
    }
}

#[derive(Default)]
struct RoomEntry {
    members: HashMap<ConnectionId, Arc<dyn MessageSink>>,
}

/// Registry of live connections per room.
///
/// Every operation is atomic with respect to a single room. A room entry
/// exists only while it has at least one member.
///
/// Each room also has a sequencer, the lock that orders its broadcasts. It is
/// kept apart from the room entry: when a room empties while its sequencer is
/// held or awaited, the sequencer survives and a room re-created under the
/// same id reuses it, so there is never more than one per id. Such a leftover
/// is dropped the next time the room empties with nobody holding it.
pub struct ConnectionRegistry {
    rooms: DashMap<RoomId, RoomEntry>,
    sequencers: DashMap<RoomId, Arc<Mutex<()>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        info!("Creating connection registry");
        Self {
            rooms: DashMap::new(),
            sequencers: DashMap::new(),
        }
    }

    /// Register a connection under a room.
    ///
    /// Joining twice with the same connection ID keeps a single entry (the
    /// newest sink wins). Returns `true` if the connection was not yet a
    /// member.
    pub fn join(&self, room: &RoomId, id: ConnectionId, sink: Arc<dyn MessageSink>) -> bool {
        let mut entry = self.rooms.entry(room.clone()).or_insert_with(|| {
            debug!(room = %room, "Creating room");
            RoomEntry::default()
        });
        // Lock order is rooms then sequencers, here and in `leave`
        self.sequencers.entry(room.clone()).or_default();

        let is_new = entry.members.insert(id.clone(), sink).is_none();

        debug!(
            room = %room,
            connection = %id,
            members = entry.members.len(),
            is_new,
            "Joined"
        );

        is_new
    }

    /// Remove a connection from a room.
    ///
    /// Unknown rooms and absent connections are a no-op. The room entry is
    /// dropped when its last member leaves. Returns `true` if the connection
    /// was a member.
    pub fn leave(&self, room: &RoomId, id: &ConnectionId) -> bool {
        let mut removed = false;
        let room_dropped = self
            .rooms
            .remove_if_mut(room, |_, entry| {
                removed = entry.members.remove(id).is_some();
                let empty = entry.members.is_empty();
                if empty {
                    self.sequencers
                        .remove_if(room, |_, sequencer| Arc::strong_count(sequencer) == 1);
                }
                empty
            })
            .is_some();

        if removed {
            debug!(room = %room, connection = %id, "Left");
        }
        if room_dropped {
            debug!(room = %room, "Deleted empty room");
        }

        removed
    }

    /// Snapshot the current members of a room.
    ///
    /// The returned list is a copy; later joins and leaves do not affect it.
    #[must_use]
    pub fn members_of(&self, room: &RoomId) -> Vec<Member> {
        self.rooms
            .get(room)
            .map(|entry| {
                entry
                    .members
                    .iter()
                    .map(|(id, sink)| Member {
                        id: id.clone(),
                        sink: sink.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Check if a connection is a member of a room.
    #[must_use]
    pub fn contains(&self, room: &RoomId, id: &ConnectionId) -> bool {
        self.rooms
            .get(room)
            .map(|entry| entry.members.contains_key(id))
            .unwrap_or(false)
    }

    /// Get the member count for a room.
    #[must_use]
    pub fn member_count(&self, room: &RoomId) -> usize {
        self.rooms
            .get(room)
            .map(|entry| entry.members.len())
            .unwrap_or(0)
    }

    /// Check if a room currently has an entry.
    #[must_use]
    pub fn room_exists(&self, room: &RoomId) -> bool {
        self.rooms.contains_key(room)
    }

    /// Get all room IDs with at least one member.
    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    /// Get the lock that orders broadcasts within a room.
    ///
    /// Returns `None` if the room has never had members, or emptied while
    /// nobody held its sequencer.
    #[must_use]
    pub fn sequencer(&self, room: &RoomId) -> Option<Arc<Mutex<()>>> {
        self.sequencers.get(room).map(|sequencer| sequencer.value().clone())
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            room_count: self.rooms.len(),
            connection_count: self.rooms.iter().map(|e| e.members.len()).sum(),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of rooms with members.
    pub room_count: usize,
    /// Number of registered connections across all rooms.
    pub connection_count: usize,
}
