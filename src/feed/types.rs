// src/feed/types.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::UpstreamError;

/// Opaque upstream identity of one followed account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One item as served to viewers. Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedItem {
    /// Provider-assigned identifier, when the provider has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: SourceId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Raw event delivered by the push subscription, before filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamEvent {
    pub id: Option<String>,
    pub source: Option<SourceId>,
    pub text: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub is_reshare: bool,
}

#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    /// Most recent items for one source, reshares excluded, at most `limit`.
    async fn pull_recent(
        &self,
        source: &SourceId,
        limit: usize,
    ) -> Result<Vec<FeedItem>, UpstreamError>;

    /// Open one long-lived push subscription filtered to `sources`.
    async fn subscribe(&self, sources: &[SourceId]) -> Result<Subscription, UpstreamError>;

    fn name(&self) -> &'static str;
}

/// What the consumer side of a subscription observes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionUpdate {
    Event(StreamEvent),
    TransportError(UpstreamError),
}

/// Consumer half of a push subscription.
///
/// Dropping it closes both channels; the producer notices and stops.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::Receiver<StreamEvent>,
    errors: mpsc::UnboundedReceiver<UpstreamError>,
}

impl Subscription {
    /// Next event or side-channel error. `None` once the event channel is closed.
    ///
    /// Queued errors are reported before events so a producer that reports
    /// and then hangs up is never lost.
    pub async fn next(&mut self) -> Option<SubscriptionUpdate> {
        tokio::select! {
            biased;
            Some(err) = self.errors.recv() => Some(SubscriptionUpdate::TransportError(err)),
            ev = self.events.recv() => ev.map(SubscriptionUpdate::Event),
        }
    }
}

/// Producer half of a push subscription, held by the adapter's reader task.
#[derive(Debug, Clone)]
pub struct SubscriptionSink {
    events: mpsc::Sender<StreamEvent>,
    errors: mpsc::UnboundedSender<UpstreamError>,
}

impl SubscriptionSink {
    /// Hand an event to the consumer. Returns `false` once the consumer is gone.
    pub async fn deliver(&self, ev: StreamEvent) -> bool {
        self.events.send(ev).await.is_ok()
    }

    /// Report a transport-level problem on the side channel.
    pub fn report(&self, err: UpstreamError) {
        let _ = self.errors.send(err);
    }

    /// Resolves when the consumer dropped its `Subscription`.
    pub async fn closed(&self) {
        self.events.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

/// Build a connected producer/consumer pair with `buffer` queued events.
pub fn subscription_channel(buffer: usize) -> (SubscriptionSink, Subscription) {
    let (events_tx, events_rx) = mpsc::channel(buffer.max(1));
    let (errors_tx, errors_rx) = mpsc::unbounded_channel();
    (
        SubscriptionSink {
            events: events_tx,
            errors: errors_tx,
        },
        Subscription {
            events: events_rx,
            errors: errors_rx,
        },
    )
}
