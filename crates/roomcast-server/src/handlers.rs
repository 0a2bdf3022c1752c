//! HTTP and WebSocket handlers for the roomcast server.
//!
//! Routes:
//!
//! - `GET /health` - liveness probe
//! - `GET /rooms/:room_id/ws` - upgrade to WebSocket and join the room
//! - `GET /rooms/:room_id/comments` - stored comment history of the room

use crate::config::{Config, StorageBackend};
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::storage::JsonFileCommentStore;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use roomcast_core::{
    BroadcastEngine, Comment, CommentStore, ConnectionRegistry, InMemoryCommentStore, RoomId,
    RoomIdError, RoomSession, StoreError,
};
use roomcast_transport::{Connection, WebSocketConnection};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Room membership.
    pub registry: Arc<ConnectionRegistry>,
    /// Fan-out over `registry`.
    pub engine: BroadcastEngine,
    /// Comment history.
    pub store: Arc<dyn CommentStore>,
    /// One permit per allowed connection, held from upgrade to disconnect.
    pub connection_slots: Arc<Semaphore>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create state with the store selected by `config.storage`.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON store directory cannot be created.
    pub async fn from_config(config: Config) -> Result<Self> {
        let store: Arc<dyn CommentStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(InMemoryCommentStore::new()),
            StorageBackend::Json => Arc::new(
                JsonFileCommentStore::open(config.storage.data_dir.clone())
                    .await
                    .with_context(|| {
                        format!(
                            "Failed to open comment store at {}",
                            config.storage.data_dir.display()
                        )
                    })?,
            ),
        };

        Ok(Self::with_store(config, store))
    }

    /// Create state around an existing store.
    #[must_use]
    pub fn with_store(config: Config, store: Arc<dyn CommentStore>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let slots = config.limits.max_connections.min(Semaphore::MAX_PERMITS);

        Self {
            engine: BroadcastEngine::new(registry.clone()),
            registry,
            store,
            connection_slots: Arc::new(Semaphore::new(slots)),
            config,
        }
    }
}

/// Errors returned by HTTP endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The room id in the path is not acceptable.
    #[error(transparent)]
    InvalidRoom(#[from] RoomIdError),

    /// The comment store failed.
    #[error("Comment store failed")]
    Store(#[from] StoreError),

    /// The connection limit is reached.
    #[error("Too many connections")]
    AtCapacity,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRoom(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::AtCapacity => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "detail": self.to_string() }));
        (self.status(), body).into_response()
    }
}

/// Comment history response body.
#[derive(Debug, Serialize)]
pub struct CommentList {
    /// Comments in append order.
    pub items: Vec<Comment>,
}

/// Build the application router.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = state.config.http.cors;

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/rooms/:room_id/ws", get(ws_handler))
        .route("/rooms/:room_id/comments", get(comments_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Serve the application on an already bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let state = Arc::new(AppState::from_config(config.clone()).await?);

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Roomcast server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/rooms/{{room_id}}/ws", addr);

    serve(listener, state, shutdown_signal()).await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Comment history handler.
async fn comments_handler(
    Path(room_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<CommentList>, ApiError> {
    let room = RoomId::new(room_id)?;

    let items = state.store.list(&room).await.map_err(|e| {
        warn!(room = %room, error = %e, "Failed to list comments");
        metrics::record_error("store");
        e
    })?;

    Ok(Json(CommentList { items }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let room = RoomId::new(room_id)?;

    // Released when the session ends, or if the upgrade never completes
    let Ok(slot) = state.connection_slots.clone().try_acquire_owned() else {
        warn!(room = %room, remote = %remote, "Rejecting connection, limit reached");
        metrics::record_error("capacity");
        return Err(ApiError::AtCapacity);
    };

    Ok(ws
        .max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, room, remote, state, slot)))
}

/// Handle a WebSocket connection for its whole life.
async fn handle_websocket(
    socket: WebSocket,
    room: RoomId,
    remote: SocketAddr,
    state: Arc<AppState>,
    _slot: OwnedSemaphorePermit,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection = WebSocketConnection::new(socket, Some(remote));
    let connection_id = connection.id().clone();
    debug!(room = %room, connection = %connection_id, remote = %remote, "WebSocket connected");

    let mut session = RoomSession::new(
        room.clone(),
        connection,
        state.engine.clone(),
        state.store.clone(),
    );
    session.join();
    metrics::set_active_rooms(state.registry.stats().room_count);

    let summary = session.run().await;

    metrics::set_active_rooms(state.registry.stats().room_count);

    debug!(
        room = %room,
        connection = %connection_id,
        comments = summary.comments,
        presence = summary.presence,
        "WebSocket disconnected"
    );
}
