use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use tower_http::cors::CorsLayer;

use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ws", get(viewer_ws))
        .route("/debug/cache", get(debug_cache))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn viewer_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| pump_viewer(socket, state.orchestrator))
}

/// Forward hub messages to one socket until either side goes away.
/// Inbound frames other than Close are ignored.
async fn pump_viewer(socket: WebSocket, orchestrator: Arc<Orchestrator>) {
    let mut session = orchestrator.connect_viewer();
    let viewer = session.id();
    let (mut tx, mut rx) = socket.split();

    loop {
        tokio::select! {
            outbound = session.recv() => {
                let Some(msg) = outbound else { break };
                if let Err(e) = tx.send(Message::Text(msg.to_json().into())).await {
                    tracing::debug!(target: "feed", viewer, error = ?e, "viewer write failed");
                    break;
                }
            }
            inbound = rx.next() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    // `session` drops here and deregisters the viewer.
}

#[derive(serde::Serialize)]
struct CacheInfo {
    items: usize,
    last_refresh_at: Option<DateTime<Utc>>,
    stale: bool,
    staleness_secs: i64,
    viewers: usize,
    tracked_sources: Vec<String>,
}

async fn debug_cache(State(state): State<AppState>) -> Json<CacheInfo> {
    let orch = &state.orchestrator;
    let cache = orch.cache();
    Json(CacheInfo {
        items: cache.len(),
        last_refresh_at: cache.last_refresh_at(),
        stale: cache.is_stale(Utc::now()),
        staleness_secs: cache.staleness().num_seconds(),
        viewers: orch.hub().viewer_count(),
        tracked_sources: orch.tracked().iter().map(|s| s.to_string()).collect(),
    })
}
