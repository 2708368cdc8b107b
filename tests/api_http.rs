// tests/api_http.rs
//
// HTTP-level tests for the public Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

mod common;

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value as Json;
use tower::ServiceExt as _; // for `oneshot`

use common::{config, event, MockSource};
use supplymap_feed::{create_router, AppState, Orchestrator};

const BODY_LIMIT: usize = 1024 * 1024;

fn test_app() -> (Router, Arc<Orchestrator>) {
    let orch = Arc::new(Orchestrator::new(
        &config(&["s1", "s2"]),
        Arc::new(MockSource::new()),
    ));
    let app = create_router(AppState {
        orchestrator: orch.clone(),
    });
    (app, orch)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _) = test_app();
    let (status, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap().trim(), "OK");
}

#[tokio::test]
async fn debug_cache_reports_cold_then_warm() {
    let (app, orch) = test_app();

    let (status, body) = get(app.clone(), "/debug/cache").await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&body).expect("json");
    assert_eq!(v["items"], 0);
    assert_eq!(v["stale"], true);
    assert!(v["last_refresh_at"].is_null());
    assert_eq!(v["staleness_secs"], 900);
    assert_eq!(v["tracked_sources"], serde_json::json!(["s1", "s2"]));

    let _viewer = orch.hub().connect();
    orch.handle_push_event(event("s2", "hand sanitizer at the corner store"));

    let (_, body) = get(app, "/debug/cache").await;
    let v: Json = serde_json::from_slice(&body).expect("json");
    assert_eq!(v["items"], 1);
    assert_eq!(v["stale"], false);
    assert!(v["last_refresh_at"].is_string());
    assert_eq!(v["viewers"], 1);
}

#[tokio::test]
async fn ws_route_requires_upgrade() {
    let (app, orch) = test_app();
    let (status, _) = get(app, "/ws").await;
    assert!(status.is_client_error(), "plain GET must be rejected, got {status}");
    assert_eq!(orch.hub().viewer_count(), 0);
}
