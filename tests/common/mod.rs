// tests/common/mod.rs
//
// In-memory upstream used by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use supplymap_feed::feed::config::FeedConfig;
use supplymap_feed::feed::types::{subscription_channel, Subscription, SubscriptionSink};
use supplymap_feed::{FeedItem, FeedSource, SourceId, StreamEvent, UpstreamError};

pub fn item(source: &str, n: usize) -> FeedItem {
    FeedItem {
        id: Some(format!("{source}-{n}")),
        source: SourceId::from(source),
        text: format!("{source} update {n}: sanitizer restocked"),
        created_at: None,
    }
}

pub fn items(source: &str, len: usize) -> Vec<FeedItem> {
    (0..len).map(|n| item(source, n)).collect()
}

pub fn event(source: &str, text: &str) -> StreamEvent {
    StreamEvent {
        id: Some(format!("push-{source}")),
        source: Some(SourceId::from(source)),
        text: Some(text.to_string()),
        ..Default::default()
    }
}

pub fn config(sources: &[&str]) -> FeedConfig {
    FeedConfig {
        tracked_sources: sources.iter().map(|s| s.to_string()).collect(),
        bearer_token: "test-token".into(),
        ..Default::default()
    }
}

#[derive(Default)]
pub struct MockSource {
    results: HashMap<String, Result<Vec<FeedItem>, UpstreamError>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<SourceId>>,
    sinks: Mutex<Vec<SubscriptionSink>>,
    subscribe_calls: Mutex<usize>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(mut self, source: &str, len: usize) -> Self {
        self.results.insert(source.to_string(), Ok(items(source, len)));
        self
    }

    pub fn with_failure(mut self, source: &str) -> Self {
        self.results.insert(
            source.to_string(),
            Err(UpstreamError::Api {
                status: 503,
                message: "over capacity".into(),
            }),
        );
        self
    }

    pub fn with_delay(mut self, source: &str, delay: Duration) -> Self {
        self.delays.insert(source.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<SourceId> {
        self.calls.lock().unwrap().clone()
    }

    pub fn subscribe_calls(&self) -> usize {
        *self.subscribe_calls.lock().unwrap()
    }

    /// Producer side of the most recent subscription, if one is open.
    pub fn latest_sink(&self) -> Option<SubscriptionSink> {
        self.sinks.lock().unwrap().last().cloned()
    }

    /// Drop every producer handle so open subscriptions close.
    pub fn hang_up(&self) {
        self.sinks.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl FeedSource for MockSource {
    async fn pull_recent(
        &self,
        source: &SourceId,
        _limit: usize,
    ) -> Result<Vec<FeedItem>, UpstreamError> {
        self.calls.lock().unwrap().push(source.clone());
        if let Some(d) = self.delays.get(source.as_str()) {
            tokio::time::sleep(*d).await;
        }
        let out = self
            .results
            .get(source.as_str())
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))?;
        // Ignores the limit so callers' trimming is observable.
        Ok(out)
    }

    async fn subscribe(&self, _sources: &[SourceId]) -> Result<Subscription, UpstreamError> {
        *self.subscribe_calls.lock().unwrap() += 1;
        let (sink, sub) = subscription_channel(16);
        self.sinks.lock().unwrap().push(sink);
        Ok(sub)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Yield to the runtime until `cond` holds (bounded).
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}
