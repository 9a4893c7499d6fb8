//! Domain types shared by the ingest endpoint, the event log backends and
//! the dashboard.

pub mod types;

pub use types::{
    capture_headers, format_timestamp, payload_from_body, EventHeaders, IngestAck, StoredEvent,
    MAX_EVENTS,
};
