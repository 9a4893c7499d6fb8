use std::{sync::Arc, time::Duration};

use metrics::counter;
use tracing::{error, warn};
use webhook_dash_core::{StoredEvent, MAX_EVENTS};
use webhook_dash_storage::{EventLog, StorageError};

use crate::upstream::{read_with_retry, with_deadline, Upstream};

/// Read/write policy over the configured [`EventLog`] backend.
///
/// Writes surface every failure so the sender can retry the delivery.
/// Reads never fail: an unreachable backend degrades to an empty list so the
/// dashboard keeps rendering.
#[derive(Clone)]
pub struct EventStore {
    log: Arc<dyn EventLog>,
    deadline: Duration,
}

impl EventStore {
    pub fn new(log: Arc<dyn EventLog>, deadline: Duration) -> Self {
        Self { log, deadline }
    }

    pub fn backend(&self) -> &'static str {
        self.log.backend()
    }

    pub async fn append(&self, event: &StoredEvent) -> Result<(), Upstream<StorageError>> {
        with_deadline("event_append", self.deadline, self.log.append(event))
            .await
            .map_err(|err| {
                counter!("event_store_failures_total", "op" => "append").increment(1);
                error!(stage = "store", backend = self.backend(), timed_out = err.is_timeout(), error = %err, "failed to append event");
                err
            })
    }

    pub async fn list(&self, limit: usize) -> Vec<StoredEvent> {
        let result = read_with_retry(
            "event_list",
            self.deadline,
            StorageError::is_transient,
            || self.log.list(limit),
        )
        .await;

        match result {
            Ok(events) => events,
            Err(err) => {
                counter!("event_store_failures_total", "op" => "list").increment(1);
                warn!(stage = "store", backend = self.backend(), error = %err, "event list unavailable; rendering empty");
                Vec::new()
            }
        }
    }

    /// The full retained log, newest first.
    pub async fn recent(&self) -> Vec<StoredEvent> {
        self.list(MAX_EVENTS).await
    }
}
