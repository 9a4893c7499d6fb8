use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Number of deliveries the event log retains.
pub const MAX_EVENTS: usize = 10;

/// Lower-cased header name to value, as received on the ingest request.
pub type EventHeaders = BTreeMap<String, String>;

/// A single webhook delivery as persisted in the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    #[serde(alias = "event")]
    pub payload: Value,
    #[serde(
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub headers: EventHeaders,
}

impl StoredEvent {
    pub fn new(payload: Value, timestamp: DateTime<Utc>, headers: EventHeaders) -> Self {
        Self {
            payload,
            timestamp,
            headers,
        }
    }

    /// Returns the header value when present and non-empty.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Best-effort client address, preferring proxy-forwarded headers.
    pub fn source_ip(&self) -> Option<&str> {
        self.header("x-forwarded-for")
            .or_else(|| self.header("x-real-ip"))
    }

    pub fn timestamp_iso(&self) -> String {
        format_timestamp(self.timestamp)
    }
}

/// Formats an instant as ISO-8601 with millisecond precision and a `Z` suffix.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn serialize_timestamp<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_timestamp(*value))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    DateTime::parse_from_rfc3339(&value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| D::Error::custom(format!("invalid timestamp {value}: {err}")))
}

/// Collects request headers into [`EventHeaders`].
///
/// Names are lower-cased. Repeated headers are joined with `", "` in arrival
/// order and values that are not valid UTF-8 are decoded lossily.
pub fn capture_headers<'a, I>(headers: I) -> EventHeaders
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut captured = EventHeaders::new();
    for (name, raw) in headers {
        let value = String::from_utf8_lossy(raw);
        captured
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    captured
}

/// Interprets a raw request body as a payload.
///
/// JSON bodies are kept structured; anything else is stored as a string so
/// the delivery is never dropped. An empty body becomes `null`.
pub fn payload_from_body(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

/// Acknowledgement envelope returned by the ingest endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestAck {
    pub status: String,
    pub message: String,
}

impl IngestAck {
    pub fn received() -> Self {
        Self {
            status: "success".to_string(),
            message: "Webhook received".to_string(),
        }
    }
}
