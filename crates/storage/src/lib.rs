//! Backends for the bounded webhook event log.
//!
//! The log is an ordered, newest-first list capped at
//! [`MAX_EVENTS`](webhook_dash_core::MAX_EVENTS) entries. Every backend must
//! apply the push and the trim as one atomic step so concurrent writers on
//! other instances never observe or leave behind an over-long list.

mod kv;
mod memory;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use webhook_dash_core::StoredEvent;

pub use kv::KvRestEventLog;
pub use memory::MemoryEventLog;

/// Storage for the most recent webhook deliveries.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Inserts the event at the head of the log and trims it to capacity.
    async fn append(&self, event: &StoredEvent) -> Result<(), StorageError>;

    /// Returns up to `limit` events, newest first.
    async fn list(&self, limit: usize) -> Result<Vec<StoredEvent>, StorageError>;

    /// Short label used in logs and metrics.
    fn backend(&self) -> &'static str;
}

/// Errors produced while talking to an event log backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("key-value store rejected command: {0}")]
    Command(String),
    #[error("unexpected key-value response: {0}")]
    Protocol(String),
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether repeating the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Self::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}
