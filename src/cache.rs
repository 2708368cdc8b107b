//! # Recency Cache
//! Newest-first rolling cache of recently seen feed items.
//!
//! One instance per process, shared by the connect-time refresh path and the
//! push path. Every operation takes the inner lock for its whole duration, so
//! a snapshot observes either the state before a merge or after it, never a
//! partially prepended batch.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use metrics::gauge;

use crate::feed::types::FeedItem;

#[derive(Debug)]
pub struct RecencyCache {
    inner: Mutex<Inner>,
    staleness: Duration,
    max_items: usize,
}

#[derive(Debug, Default)]
struct Inner {
    last_refresh_at: Option<DateTime<Utc>>,
    /// Newest first.
    items: Vec<FeedItem>,
}

impl RecencyCache {
    /// Create an empty (cold) cache.
    pub fn new(staleness: Duration, max_items: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            staleness,
            max_items: max_items.max(1),
        }
    }

    /// True if never refreshed, or if the freshness window has elapsed at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let inner = self.inner.lock().expect("recency cache mutex poisoned");
        match inner.last_refresh_at {
            None => true,
            Some(at) => now - at >= self.staleness,
        }
    }

    /// Drop every held item ahead of a stale refresh.
    ///
    /// The stamp is left alone; the refresh merges that follow set it.
    pub fn begin_cycle(&self) {
        let mut inner = self.inner.lock().expect("recency cache mutex poisoned");
        inner.items.clear();
        gauge!("feed_cache_items").set(0.0);
    }

    /// Prepend `batch` (kept in its given order) and stamp `now`.
    ///
    /// Does not deduplicate: merging the same batch twice stores it twice.
    /// When the total cap is exceeded the oldest tail is dropped. The stamp
    /// only moves forward; a merge carrying an older `now` keeps the newer one.
    pub fn merge_batch(&self, batch: Vec<FeedItem>, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("recency cache mutex poisoned");

        if !batch.is_empty() {
            let mut items = batch;
            items.append(&mut inner.items);
            items.truncate(self.max_items);
            inner.items = items;
        }
        let stamp = inner.last_refresh_at.map_or(now, |at| at.max(now));
        inner.last_refresh_at = Some(stamp);

        gauge!("feed_cache_items").set(inner.items.len() as f64);
        gauge!("feed_cache_last_refresh_ts").set(stamp.timestamp() as f64);
    }

    /// Current ordered view (newest first).
    pub fn snapshot(&self) -> Vec<FeedItem> {
        let inner = self.inner.lock().expect("recency cache mutex poisoned");
        inner.items.clone()
    }

    pub fn last_refresh_at(&self) -> Option<DateTime<Utc>> {
        let inner = self.inner.lock().expect("recency cache mutex poisoned");
        inner.last_refresh_at
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("recency cache mutex poisoned");
        inner.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freshness window (useful for diagnostics/telemetry).
    pub fn staleness(&self) -> Duration {
        self.staleness
    }
}
