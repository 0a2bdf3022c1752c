//! # roomcast-server
//!
//! HTTP and WebSocket front end for roomcast rooms.
//!
//! The `roomcast` binary wires these modules together; they are exposed as a
//! library so the server can be embedded and driven from integration tests.

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod storage;

pub use config::Config;
pub use handlers::{app, run_server, serve, AppState};
