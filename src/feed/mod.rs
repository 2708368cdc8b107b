// src/feed/mod.rs
pub mod config;
pub mod providers;
pub mod types;

use crate::error::FilterMismatch;
use crate::feed::types::{FeedItem, SourceId, StreamEvent};
use metrics::{describe_counter, describe_gauge};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feed_pull_total", "Recent-item pulls issued upstream.");
        describe_counter!(
            "feed_pull_errors_total",
            "Pulls that failed or timed out."
        );
        describe_counter!(
            "feed_push_events_total",
            "Push events admitted into the cache."
        );
        describe_counter!(
            "feed_push_filtered_total",
            "Push events dropped by content/source filtering."
        );
        describe_counter!(
            "feed_broadcast_dropped_total",
            "Messages dropped for a viewer whose queue was full."
        );
        describe_counter!(
            "feed_subscription_errors_total",
            "Transport errors reported by the push subscription."
        );
        describe_gauge!("feed_viewers_connected", "Currently connected viewers.");
        describe_gauge!("feed_cache_items", "Items held by the recency cache.");
        describe_gauge!(
            "feed_cache_last_refresh_ts",
            "Unix ts of the last cache merge."
        );
        describe_gauge!(
            "feed_staleness_window_secs",
            "Configured freshness window of the cache."
        );
    });
}

/// Normalize text: decode HTML entities, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reshare heuristic for payloads that carry no explicit marker.
pub fn looks_like_reshare(text: &str) -> bool {
    text.trim_start().starts_with("RT @")
}

pub fn is_tracked(source: &SourceId, tracked: &[SourceId]) -> bool {
    tracked.iter().any(|t| t == source)
}

/// Admit a push-delivered event or say why it was dropped.
///
/// The source check repeats the server-side subscription filter:
/// an untracked source never reaches the cache or a viewer.
pub fn admit_push_event(ev: StreamEvent, tracked: &[SourceId]) -> Result<FeedItem, FilterMismatch> {
    let text = ev.text.as_deref().map(normalize_text).unwrap_or_default();
    if text.is_empty() {
        return Err(FilterMismatch::EmptyText);
    }
    let source = ev.source.ok_or(FilterMismatch::MissingSource)?;
    if !is_tracked(&source, tracked) {
        return Err(FilterMismatch::UntrackedSource);
    }
    if ev.is_reshare || looks_like_reshare(&text) {
        return Err(FilterMismatch::Reshare);
    }
    Ok(FeedItem {
        id: ev.id,
        source,
        text,
        created_at: ev.created_at,
    })
}
