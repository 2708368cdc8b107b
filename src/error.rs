// src/error.rs
use thiserror::Error;

/// A pull or the push subscription failed at the transport/provider level.
///
/// Always recovered locally: logged and counted, never surfaced to a viewer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("network error: {0}")]
    Network(String),

    #[error("provider error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("upstream call timed out after {0}s")]
    Timeout(u64),

    #[error("subscription closed: {0}")]
    Closed(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        UpstreamError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(err: serde_json::Error) -> Self {
        UpstreamError::Parse(err.to_string())
    }
}

/// Why a push-delivered event was not admitted. Not a fault.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum FilterMismatch {
    #[error("event has no text")]
    EmptyText,

    #[error("event has no originating source")]
    MissingSource,

    #[error("event source is not tracked")]
    UntrackedSource,

    #[error("event is a reshare")]
    Reshare,
}

impl FilterMismatch {
    /// Short label used for metrics and debug logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterMismatch::EmptyText => "empty_text",
            FilterMismatch::MissingSource => "missing_source",
            FilterMismatch::UntrackedSource => "untracked_source",
            FilterMismatch::Reshare => "reshare",
        }
    }
}
