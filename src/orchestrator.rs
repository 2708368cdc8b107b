// src/orchestrator.rs
//! Ingestion orchestrator: decides pull vs. cache on viewer connect, keeps the
//! push subscription alive, and drives the distribution hub.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use metrics::{counter, gauge};
use tokio::task::JoinHandle;

use crate::cache::RecencyCache;
use crate::error::UpstreamError;
use crate::feed::config::FeedConfig;
use crate::feed::types::{
    FeedItem, FeedSource, SourceId, StreamEvent, Subscription, SubscriptionUpdate,
};
use crate::feed::{admit_push_event, ensure_metrics_described};
use crate::hub::{Hub, Payload, ViewerId, ViewerSession};

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// What the connect handshake did for one viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Cache was stale; pulls ran. `batches` merged, `failures` skipped.
    Refreshed { batches: usize, failures: usize },
    /// Cache was fresh; the snapshot was sent without network calls.
    Served { items: usize },
}

pub struct Orchestrator {
    source: Arc<dyn FeedSource>,
    cache: Arc<RecencyCache>,
    hub: Arc<Hub>,
    tracked: Vec<SourceId>,
    pull_limit: usize,
    pull_timeout: Duration,
}

impl Orchestrator {
    /// Build the cache and hub from `cfg` around an upstream adapter.
    pub fn new(cfg: &FeedConfig, source: Arc<dyn FeedSource>) -> Self {
        ensure_metrics_described();
        gauge!("feed_staleness_window_secs").set(cfg.staleness_secs as f64);

        Self {
            source,
            cache: Arc::new(RecencyCache::new(cfg.staleness(), cfg.cache_max_items)),
            hub: Arc::new(Hub::new(cfg.event_name.clone(), cfg.viewer_buffer)),
            tracked: cfg.tracked(),
            pull_limit: cfg.pull_limit,
            pull_timeout: cfg.pull_timeout(),
        }
    }

    pub fn cache(&self) -> &Arc<RecencyCache> {
        &self.cache
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn tracked(&self) -> &[SourceId] {
        &self.tracked
    }

    /// Register a viewer and start its connect handshake in the background.
    pub fn connect_viewer(self: &Arc<Self>) -> ViewerSession {
        let session = self.hub.connect();
        let viewer = session.id();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = this.handle_connect(viewer).await;
            tracing::debug!(target: "feed", viewer, ?outcome, "connect handshake done");
        });
        session
    }

    pub async fn handle_connect(&self, viewer: ViewerId) -> ConnectOutcome {
        self.handle_connect_at(viewer, Utc::now()).await
    }

    /// Connect handshake evaluated at `now`.
    pub async fn handle_connect_at(&self, viewer: ViewerId, now: DateTime<Utc>) -> ConnectOutcome {
        if !self.cache.is_stale(now) {
            let snapshot = self.cache.snapshot();
            let items = snapshot.len();
            tracing::info!(target: "feed", viewer, items, "serving cached feed");
            self.hub.send_to(viewer, Payload::Batch(snapshot));
            return ConnectOutcome::Served { items };
        }

        tracing::info!(target: "feed", viewer, sources = self.tracked.len(), "cache stale, pulling");
        self.refresh_for(viewer, now).await
    }

    /// Pull every tracked source concurrently; merge and forward each batch
    /// as it completes. Completion order, not configuration order, decides
    /// the merge order.
    async fn refresh_for(&self, viewer: ViewerId, now: DateTime<Utc>) -> ConnectOutcome {
        // Each refresh replaces the previous cycle's items.
        self.cache.begin_cycle();

        let mut pulls: FuturesUnordered<_> = self
            .tracked
            .iter()
            .map(|source| async move { (source, self.pull_one(source).await) })
            .collect();

        let mut batches = 0usize;
        let mut failures = 0usize;
        while let Some((source, res)) = pulls.next().await {
            match res {
                Ok(mut items) => {
                    items.truncate(self.pull_limit);
                    self.cache.merge_batch(items.clone(), now);
                    self.hub.send_to(viewer, Payload::Batch(items));
                    batches += 1;
                }
                Err(e) => {
                    failures += 1;
                    counter!("feed_pull_errors_total").increment(1);
                    tracing::warn!(target: "feed", %source, error = ?e, "pull failed, skipping source");
                }
            }
        }

        // A refresh attempt always stamps, even if every pull failed.
        if batches == 0 {
            self.cache.merge_batch(Vec::new(), now);
        }

        ConnectOutcome::Refreshed { batches, failures }
    }

    async fn pull_one(&self, source: &SourceId) -> Result<Vec<FeedItem>, UpstreamError> {
        counter!("feed_pull_total").increment(1);
        tokio::time::timeout(
            self.pull_timeout,
            self.source.pull_recent(source, self.pull_limit),
        )
        .await
        .map_err(|_| UpstreamError::Timeout(self.pull_timeout.as_secs()))?
    }

    /// Filter one push event; if admitted, merge it and broadcast it.
    /// Returns how many viewers accepted the broadcast.
    pub fn handle_push_event(&self, ev: StreamEvent) -> Option<usize> {
        match admit_push_event(ev, &self.tracked) {
            Ok(item) => {
                counter!("feed_push_events_total").increment(1);
                self.cache.merge_batch(vec![item.clone()], Utc::now());
                let delivered = self.hub.broadcast_all(Payload::Item(item));
                tracing::debug!(target: "feed", delivered, "push event broadcast");
                Some(delivered)
            }
            Err(why) => {
                counter!("feed_push_filtered_total", "reason" => why.as_str()).increment(1);
                tracing::debug!(target: "feed", reason = why.as_str(), "push event dropped");
                None
            }
        }
    }

    /// Consume one subscription until its event channel closes.
    /// Returns the number of events seen (admitted or not).
    pub async fn consume(&self, mut sub: Subscription) -> usize {
        let mut seen = 0usize;
        while let Some(update) = sub.next().await {
            match update {
                SubscriptionUpdate::Event(ev) => {
                    seen += 1;
                    self.handle_push_event(ev);
                }
                SubscriptionUpdate::TransportError(e) => {
                    counter!("feed_subscription_errors_total").increment(1);
                    tracing::warn!(target: "feed", error = ?e, "push subscription error");
                }
            }
        }
        seen
    }

    /// Spawn the push supervisor. Call once per process.
    pub fn spawn_subscription(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.supervise_subscription().await })
    }

    async fn supervise_subscription(&self) {
        let mut attempt: u32 = 0;
        loop {
            match self.source.subscribe(&self.tracked).await {
                Ok(sub) => {
                    tracing::info!(
                        target: "feed",
                        provider = self.source.name(),
                        sources = self.tracked.len(),
                        "push subscription open"
                    );
                    if self.consume(sub).await > 0 {
                        attempt = 0;
                    }
                    tracing::warn!(target: "feed", "push subscription closed");
                }
                Err(e) => {
                    counter!("feed_subscription_errors_total").increment(1);
                    tracing::warn!(target: "feed", error = ?e, "push subscribe failed");
                }
            }
            attempt = attempt.saturating_add(1);
            let delay = backoff_delay(attempt);
            tracing::info!(target: "feed", attempt, delay_ms = delay.as_millis() as u64, "re-subscribing");
            tokio::time::sleep(delay).await;
        }
    }
}

/// 500ms doubling per attempt, capped at 60s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    Duration::from_millis(BACKOFF_BASE_MS << shift).min(BACKOFF_MAX)
}
