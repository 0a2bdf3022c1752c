//! # roomcast-core
//!
//! Core types and the fan-out engine for the roomcast room messaging service.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **RoomId** - Validated room identifier; rooms exist while they have members
//! - **ConnectionRegistry** - Which live connections belong to which room
//! - **BroadcastEngine** - Best-effort delivery to every member of a room
//! - **RoomSession** - Per-connection protocol loop
//! - **CommentStore** - Append-only comment history per room
//! - **Presence** - Inactivity thresholds behind the `active`/`idle`/`sleep` labels
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐
//! │  Connection │────▶│ RoomSession │────▶│ CommentStore │
//! └─────────────┘     └─────────────┘     └──────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐     ┌──────────────────┐
//!                     │  Broadcast  │────▶│ ConnectionRegistry│
//!                     └─────────────┘     └──────────────────┘
//! ```

pub mod broadcast;
pub mod comment;
pub mod presence;
pub mod registry;
pub mod room;
pub mod session;
pub mod store;

pub use broadcast::{BroadcastEngine, DeliveryReport};
pub use comment::Comment;
pub use presence::{PresenceStatus, PresenceThresholds, PresenceTracker};
pub use registry::{ConnectionRegistry, Member, RegistryStats};
pub use room::{RoomId, RoomIdError};
pub use session::{RoomSession, SessionError, SessionState, SessionSummary};
pub use store::{CommentStore, InMemoryCommentStore, StoreError};
