use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use url::Url;
use webhook_dash_core::{StoredEvent, MAX_EVENTS};

use crate::{EventLog, StorageError};

/// Event log stored as a list in a key-value service reachable over its
/// REST command API.
///
/// Single commands are posted as a JSON array to the base URL. Appends go to
/// `multi-exec` so the `LPUSH` and the `LTRIM` commit together.
#[derive(Clone)]
pub struct KvRestEventLog {
    http: Client,
    base_url: Url,
    token: String,
    key: String,
    capacity: usize,
}

impl KvRestEventLog {
    pub fn new(base_url: Url, token: impl Into<String>, key: impl Into<String>, http: Client) -> Self {
        Self {
            http,
            base_url,
            token: token.into(),
            key: key.into(),
            capacity: MAX_EVENTS,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    async fn command(&self, args: &[&str]) -> Result<Value, StorageError> {
        let response = self
            .http
            .post(self.base_url.clone())
            .bearer_auth(&self.token)
            .json(args)
            .send()
            .await?;

        parse_reply::<CommandReply>(response).await?.into_result()
    }

    async fn transaction(&self, commands: &[Vec<&str>]) -> Result<Vec<Value>, StorageError> {
        let url = self.base_url.join("multi-exec")?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(commands)
            .send()
            .await?;

        let replies = parse_reply::<TransactionReply>(response).await?;
        let replies = match replies {
            TransactionReply::Replies(replies) => replies,
            TransactionReply::Aborted(reply) => {
                let err = match reply.into_result() {
                    Err(err) => err,
                    Ok(_) => StorageError::Protocol("transaction returned a single reply".to_string()),
                };
                return Err(err);
            }
        };

        if replies.len() != commands.len() {
            return Err(StorageError::Protocol(format!(
                "expected {} transaction replies, got {}",
                commands.len(),
                replies.len()
            )));
        }

        replies.into_iter().map(CommandReply::into_result).collect()
    }
}

#[async_trait]
impl EventLog for KvRestEventLog {
    async fn append(&self, event: &StoredEvent) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(event)?;
        let last_index = (self.capacity - 1).to_string();
        self.transaction(&[
            vec!["LPUSH", self.key.as_str(), encoded.as_str()],
            vec!["LTRIM", self.key.as_str(), "0", last_index.as_str()],
        ])
        .await?;
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<StoredEvent>, StorageError> {
        let limit = limit.min(self.capacity);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let last_index = (limit - 1).to_string();
        let result = self
            .command(&["LRANGE", self.key.as_str(), "0", last_index.as_str()])
            .await?;

        let items = match result {
            Value::Array(items) => items,
            Value::Null => return Ok(Vec::new()),
            other => {
                return Err(StorageError::Protocol(format!(
                    "LRANGE returned {other} instead of a list"
                )))
            }
        };

        Ok(items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| match decode_event(item) {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!(stage = "store", key = %self.key, index, error = %err, "skipping undecodable event");
                    None
                }
            })
            .collect())
    }

    fn backend(&self) -> &'static str {
        "kv_rest"
    }
}

fn decode_event(item: Value) -> Result<StoredEvent, serde_json::Error> {
    match item {
        Value::String(raw) => serde_json::from_str(&raw),
        other => serde_json::from_value(other),
    }
}

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl CommandReply {
    fn into_result(self) -> Result<Value, StorageError> {
        match self.error {
            Some(error) => Err(StorageError::Command(error)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TransactionReply {
    Replies(Vec<CommandReply>),
    Aborted(CommandReply),
}

async fn parse_reply<T>(response: Response) -> Result<T, StorageError>
where
    T: serde::de::DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        if let Ok(CommandReply {
            error: Some(error), ..
        }) = serde_json::from_str::<CommandReply>(&body)
        {
            return Err(StorageError::Command(error));
        }
        return Err(StorageError::Status { status, body });
    }

    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use httpmock::prelude::*;
    use reqwest::StatusCode;
    use serde_json::json;
    use webhook_dash_core::EventHeaders;

    fn log(server: &MockServer) -> KvRestEventLog {
        let base = Url::parse(&server.url("/")).expect("url");
        KvRestEventLog::new(
            base,
            "kv-token",
            "webhook:events",
            Client::builder().build().expect("client"),
        )
    }

    fn event(n: u64) -> StoredEvent {
        let timestamp = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        let mut headers = EventHeaders::new();
        headers.insert("user-agent".to_string(), "test".to_string());
        StoredEvent::new(json!({ "n": n }), timestamp, headers)
    }

    #[tokio::test]
    async fn append_pushes_and_trims_in_one_transaction() {
        let server = MockServer::start_async().await;
        let encoded = serde_json::to_string(&event(1)).expect("encode");

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/multi-exec")
                    .header("Authorization", "Bearer kv-token")
                    .json_body(json!([
                        ["LPUSH", "webhook:events", encoded],
                        ["LTRIM", "webhook:events", "0", "9"],
                    ]));
                then.status(200)
                    .json_body(json!([{ "result": 4 }, { "result": "OK" }]));
            })
            .await;

        log(&server).append(&event(1)).await.expect("append");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn append_surfaces_command_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/multi-exec");
                then.status(200).json_body(json!([
                    { "error": "WRONGTYPE Operation against a key holding the wrong kind of value" },
                    { "result": "OK" }
                ]));
            })
            .await;

        let err = log(&server).append(&event(1)).await.expect_err("should fail");
        assert!(matches!(err, StorageError::Command(message) if message.starts_with("WRONGTYPE")));
    }

    #[tokio::test]
    async fn list_decodes_events_and_skips_corrupt_entries() {
        let server = MockServer::start_async().await;
        let newest = serde_json::to_string(&event(2)).expect("encode");
        let older = serde_json::to_string(&event(1)).expect("encode");

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/")
                    .header("Authorization", "Bearer kv-token")
                    .json_body(json!(["LRANGE", "webhook:events", "0", "9"]));
                then.status(200)
                    .json_body(json!({ "result": [newest, "not json", older] }));
            })
            .await;

        let events = log(&server).list(MAX_EVENTS).await.expect("list");
        mock.assert_async().await;
        let payloads: Vec<_> = events.iter().map(|event| event.payload["n"].clone()).collect();
        assert_eq!(payloads, vec![json!(2), json!(1)]);
    }

    #[tokio::test]
    async fn list_treats_missing_key_as_empty() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/");
                then.status(200).json_body(json!({ "result": null }));
            })
            .await;

        let events = log(&server).list(3).await.expect("list");
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn custom_capacity_bounds_trim_and_range() {
        let server = MockServer::start_async().await;
        let encoded = serde_json::to_string(&event(1)).expect("encode");
        let transaction = server
            .mock_async(|when, then| {
                when.method(POST).path("/multi-exec").json_body(json!([
                    ["LPUSH", "webhook:events", encoded],
                    ["LTRIM", "webhook:events", "0", "2"],
                ]));
                then.status(200)
                    .json_body(json!([{ "result": 1 }, { "result": "OK" }]));
            })
            .await;
        let range = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/")
                    .json_body(json!(["LRANGE", "webhook:events", "0", "2"]));
                then.status(200).json_body(json!({ "result": [] }));
            })
            .await;

        let log = log(&server).with_capacity(3);
        log.append(&event(1)).await.expect("append");
        assert!(log.list(MAX_EVENTS).await.expect("list").is_empty());
        transaction.assert_async().await;
        range.assert_async().await;
    }

    #[tokio::test]
    async fn list_with_zero_limit_skips_network() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).json_body(json!({ "result": [] }));
            })
            .await;

        let events = log(&server).list(0).await.expect("list");
        assert!(events.is_empty());
        assert_eq!(mock.hits_async().await, 0);
    }

    #[tokio::test]
    async fn unauthorized_status_is_not_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/");
                then.status(401).body("Unauthorized");
            })
            .await;

        let err = log(&server).list(MAX_EVENTS).await.expect_err("should fail");
        match &err {
            StorageError::Status { status, body } => {
                assert_eq!(*status, StatusCode::UNAUTHORIZED);
                assert_eq!(body, "Unauthorized");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/");
                then.status(503).body("unavailable");
            })
            .await;

        let err = log(&server).list(MAX_EVENTS).await.expect_err("should fail");
        assert!(err.is_transient());
    }
}
