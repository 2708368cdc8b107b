// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod cache;
pub mod error;
pub mod feed;
pub mod hub;
pub mod metrics;
pub mod orchestrator;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::error::{FilterMismatch, UpstreamError};
pub use crate::feed::types::{FeedItem, FeedSource, SourceId, StreamEvent};
pub use crate::orchestrator::{ConnectOutcome, Orchestrator};
