//! Live feed service: binary entrypoint
//! Boots the Axum HTTP server, wires the feed orchestrator, and starts the
//! push subscription once for the whole process.

use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use supplymap_feed::feed::config::FeedConfig;
use supplymap_feed::feed::providers::twitter::TwitterSource;
use supplymap_feed::metrics::Metrics;
use supplymap_feed::{create_router, AppState, Orchestrator};

/// Compact tracing logs; leaves an already installed global subscriber alone.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("supplymap_feed=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let cfg = FeedConfig::load_default().context("loading feed config")?;
    tracing::info!(
        sources = cfg.tracked_sources.len(),
        staleness_secs = cfg.staleness_secs,
        pull_limit = cfg.pull_limit,
        "feed config loaded"
    );

    // Recorder first so metric descriptions register.
    let metrics = Metrics::init()?;

    let source = TwitterSource::from_config(&cfg)?;
    let orchestrator = Arc::new(Orchestrator::new(&cfg, Arc::new(source)));

    // One push subscription per process, not per viewer.
    orchestrator.spawn_subscription();

    let router = create_router(AppState { orchestrator }).merge(metrics.router());

    Ok(router.into())
}
