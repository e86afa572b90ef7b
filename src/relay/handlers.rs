//! HTTP and WebSocket handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Json, Path, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::hub::{Hub, HubStats};
use crate::protocol::DEFAULT_ROOM;

/// State shared across handlers
pub struct RelayState {
    /// Room hub
    pub hub: Hub,
    /// Largest message accepted from a member
    pub max_frame_bytes: usize,
    /// Server start time
    pub start_time: Instant,
}

impl RelayState {
    /// Create state with an empty hub
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            hub: Hub::new(),
            max_frame_bytes,
            start_time: Instant::now(),
        }
    }

    /// Get server uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Create the relay router
pub fn create_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/ws", get(join_default))
        .route("/ws/:room", get(join_room))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always `ok`
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Stats response
#[derive(Serialize)]
struct StatsResponse {
    uptime_secs: u64,
    #[serde(flatten)]
    hub: HubStats,
}

async fn stats(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    Json(StatsResponse {
        uptime_secs: state.uptime().as_secs(),
        hub: state.hub.stats(),
    })
}

async fn join_default(ws: WebSocketUpgrade, State(state): State<Arc<RelayState>>) -> Response {
    upgrade(ws, state, DEFAULT_ROOM.to_string())
}

async fn join_room(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    State(state): State<Arc<RelayState>>,
) -> Response {
    upgrade(ws, state, room)
}

fn upgrade(ws: WebSocketUpgrade, state: Arc<RelayState>, room: String) -> Response {
    ws.max_message_size(state.max_frame_bytes)
        .on_upgrade(move |socket| serve_member(socket, state, room))
}

async fn serve_member(socket: WebSocket, state: Arc<RelayState>, room: String) {
    let (member, mut inbox) = state.hub.join(&room);
    tracing::info!(%room, member, "relay member connected");

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(frame) = inbox.recv().await {
            let message = match String::from_utf8(frame.to_vec()) {
                Ok(text) => Message::Text(text),
                Err(e) => Message::Binary(e.into_bytes()),
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        let frame = match message {
            Ok(Message::Text(text)) => Bytes::from(text),
            Ok(Message::Binary(data)) => Bytes::from(data),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                tracing::debug!(%room, member, %err, "relay member read failed");
                break;
            },
        };
        state.hub.publish(&room, member, frame);
    }

    state.hub.leave(&room, member);
    writer.abort();
    tracing::info!(%room, member, "relay member disconnected");
}
