use std::{
    collections::VecDeque,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use webhook_dash_core::{StoredEvent, MAX_EVENTS};

use crate::{EventLog, StorageError};

/// Process-local event log.
///
/// Used when no key-value store is configured and in tests. Contents are
/// lost on restart and are not shared between instances.
#[derive(Clone)]
pub struct MemoryEventLog {
    events: Arc<RwLock<VecDeque<StoredEvent>>>,
    capacity: usize,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::with_capacity(MAX_EVENTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Arc::new(RwLock::new(VecDeque::with_capacity(capacity + 1))),
            capacity,
        }
    }

    /// Number of events currently retained.
    pub fn len(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: &StoredEvent) -> Result<(), StorageError> {
        let mut events = self
            .events
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        events.push_front(event.clone());
        events.truncate(self.capacity);
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<StoredEvent>, StorageError> {
        let events = self
            .events
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(events.iter().take(limit).cloned().collect())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use webhook_dash_core::EventHeaders;

    fn event(n: i64) -> StoredEvent {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        StoredEvent::new(
            json!({ "n": n }),
            base + Duration::seconds(n),
            EventHeaders::new(),
        )
    }

    #[tokio::test]
    async fn keeps_only_the_most_recent_events() {
        let log = MemoryEventLog::new();
        for n in 1..=12 {
            log.append(&event(n)).await.expect("append");
        }

        let events = log.list(MAX_EVENTS).await.expect("list");
        let payloads: Vec<_> = events.iter().map(|event| event.payload.clone()).collect();
        let expected: Vec<_> = (3..=12).rev().map(|n| json!({ "n": n })).collect();
        assert_eq!(payloads, expected);
        assert_eq!(log.len(), MAX_EVENTS);
    }

    #[tokio::test]
    async fn appended_event_is_listed_first() {
        let log = MemoryEventLog::new();
        log.append(&event(1)).await.expect("append");
        log.append(&event(2)).await.expect("append");

        let events = log.list(MAX_EVENTS).await.expect("list");
        assert_eq!(events[0], event(2));
    }

    #[tokio::test]
    async fn list_respects_limit() {
        let log = MemoryEventLog::with_capacity(3);
        for n in 1..=5 {
            log.append(&event(n)).await.expect("append");
        }

        assert_eq!(log.len(), 3);
        let events = log.list(2).await.expect("list");
        assert_eq!(events, vec![event(5), event(4)]);
        assert!(log.list(0).await.expect("list").is_empty());
    }
}
