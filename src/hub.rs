// src/hub.rs
//! Distribution hub: the set of connected viewers and fan-out to them.
//!
//! Each viewer owns a bounded queue. Delivery never waits: a full queue loses
//! the message for that viewer only, a closed queue removes the viewer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::feed::types::FeedItem;

pub type ViewerId = u64;

/// Either one item (push path) or a sequence (pull batches, snapshots).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Payload {
    Item(FeedItem),
    Batch(Vec<FeedItem>),
}

impl Payload {
    pub fn items(&self) -> &[FeedItem] {
        match self {
            Payload::Item(it) => std::slice::from_ref(it),
            Payload::Batch(v) => v,
        }
    }
}

/// The one outbound frame type: a named event carrying feed items.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ViewerMessage {
    pub event: String,
    pub data: Payload,
}

impl ViewerMessage {
    pub fn to_json(&self) -> String {
        // Serializing plain strings/options cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

type Outbox = mpsc::Sender<Arc<ViewerMessage>>;

#[derive(Debug)]
pub struct Hub {
    viewers: Mutex<HashMap<ViewerId, Outbox>>,
    next_id: AtomicU64,
    buffer: usize,
    event_name: String,
}

enum Delivery {
    Sent,
    Dropped,
    Gone,
}

impl Hub {
    pub fn new(event_name: impl Into<String>, buffer: usize) -> Self {
        Self {
            viewers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            event_name: event_name.into(),
        }
    }

    /// Register a new viewer. The returned session deregisters on drop.
    pub fn connect(self: &Arc<Self>) -> ViewerSession {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        let count = {
            let mut viewers = self.viewers.lock().expect("hub mutex poisoned");
            viewers.insert(id, tx);
            viewers.len()
        };
        gauge!("feed_viewers_connected").set(count as f64);
        tracing::info!(target: "feed", viewer = id, viewers = count, "viewer connected");
        ViewerSession {
            id,
            rx,
            hub: Arc::clone(self),
        }
    }

    /// Deregister a viewer. Returns whether it was still registered.
    pub fn disconnect(&self, id: ViewerId) -> bool {
        let (removed, count) = {
            let mut viewers = self.viewers.lock().expect("hub mutex poisoned");
            let removed = viewers.remove(&id).is_some();
            (removed, viewers.len())
        };
        if removed {
            gauge!("feed_viewers_connected").set(count as f64);
            tracing::info!(target: "feed", viewer = id, viewers = count, "viewer disconnected");
        }
        removed
    }

    /// Deliver to exactly one viewer. Returns `false` if it was not delivered.
    pub fn send_to(&self, id: ViewerId, payload: Payload) -> bool {
        let msg = Arc::new(self.message(payload));
        let mut viewers = self.viewers.lock().expect("hub mutex poisoned");
        let outcome = match viewers.get(&id) {
            Some(tx) => Self::deliver(id, tx, Arc::clone(&msg)),
            None => return false,
        };
        match outcome {
            Delivery::Sent => true,
            Delivery::Dropped => false,
            Delivery::Gone => {
                viewers.remove(&id);
                gauge!("feed_viewers_connected").set(viewers.len() as f64);
                false
            }
        }
    }

    /// Deliver to every connected viewer; returns how many accepted it.
    pub fn broadcast_all(&self, payload: Payload) -> usize {
        let msg = Arc::new(self.message(payload));
        let mut viewers = self.viewers.lock().expect("hub mutex poisoned");

        let mut delivered = 0usize;
        let mut gone = Vec::new();
        for (id, tx) in viewers.iter() {
            match Self::deliver(*id, tx, Arc::clone(&msg)) {
                Delivery::Sent => delivered += 1,
                Delivery::Dropped => {}
                Delivery::Gone => gone.push(*id),
            }
        }
        if !gone.is_empty() {
            for id in gone {
                viewers.remove(&id);
            }
            gauge!("feed_viewers_connected").set(viewers.len() as f64);
        }
        delivered
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.lock().expect("hub mutex poisoned").len()
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    fn message(&self, data: Payload) -> ViewerMessage {
        ViewerMessage {
            event: self.event_name.clone(),
            data,
        }
    }

    fn deliver(id: ViewerId, tx: &Outbox, msg: Arc<ViewerMessage>) -> Delivery {
        match tx.try_send(msg) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => {
                counter!("feed_broadcast_dropped_total").increment(1);
                tracing::warn!(target: "feed", viewer = id, "viewer queue full, message dropped");
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Gone,
        }
    }
}

/// One live viewer channel, owned by the connection handler.
#[derive(Debug)]
pub struct ViewerSession {
    id: ViewerId,
    rx: mpsc::Receiver<Arc<ViewerMessage>>,
    hub: Arc<Hub>,
}

impl ViewerSession {
    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// Next outbound message; `None` once the hub dropped this viewer.
    pub async fn recv(&mut self) -> Option<Arc<ViewerMessage>> {
        self.rx.recv().await
    }

    /// Non-blocking variant, mostly for draining.
    pub fn try_recv(&mut self) -> Option<Arc<ViewerMessage>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for ViewerSession {
    fn drop(&mut self) {
        self.hub.disconnect(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::types::SourceId;

    fn item(text: &str) -> FeedItem {
        FeedItem {
            id: None,
            source: SourceId::from("s1"),
            text: text.to_string(),
            created_at: None,
        }
    }

    #[test]
    fn unresponsive_viewer_does_not_block_others() {
        let hub = Arc::new(Hub::new("tweets", 1));
        let mut sessions: Vec<ViewerSession> = (0..5).map(|_| hub.connect()).collect();

        // Fill the first viewer's queue and never drain it.
        let stuck = sessions[0].id();
        assert!(hub.send_to(stuck, Payload::Item(item("backlog"))));

        let delivered = hub.broadcast_all(Payload::Item(item("restock")));
        assert_eq!(delivered, 4);
        assert_eq!(hub.viewer_count(), 5, "full queue is not a disconnect");

        for s in sessions.iter_mut().skip(1) {
            let msg = s.try_recv().expect("delivered");
            assert_eq!(msg.data.items()[0].text, "restock");
        }
        let first = sessions[0].try_recv().expect("backlog");
        assert_eq!(first.data.items()[0].text, "backlog");
        assert!(sessions[0].try_recv().is_none());
    }

    #[test]
    fn dropped_session_is_deregistered() {
        let hub = Arc::new(Hub::new("tweets", 4));
        let a = hub.connect();
        let b = hub.connect();
        assert_ne!(a.id(), b.id());
        let gone = b.id();
        drop(b);

        assert_eq!(hub.viewer_count(), 1);
        assert!(!hub.send_to(gone, Payload::Item(item("x"))));
        assert_eq!(hub.broadcast_all(Payload::Batch(vec![item("y")])), 1);
        drop(a);
        assert_eq!(hub.viewer_count(), 0);
    }

    #[test]
    fn frame_shape_is_named_event() {
        let msg = ViewerMessage {
            event: "tweets".into(),
            data: Payload::Batch(vec![item("masks")]),
        };
        let v: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(v["event"], "tweets");
        assert_eq!(v["data"][0]["text"], "masks");
        assert_eq!(v["data"][0]["source"], "s1");

        let single = ViewerMessage {
            event: "tweets".into(),
            data: Payload::Item(item("gel")),
        };
        let v: serde_json::Value = serde_json::from_str(&single.to_json()).unwrap();
        assert_eq!(v["data"]["text"], "gel");
    }
}
