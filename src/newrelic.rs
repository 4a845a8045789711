use crate::env::{env_opt, env_or, NEW_RELIC_LICENSE_KEY_ENV, NEW_RELIC_LOG_ENDPOINT_ENV};
use crate::record::LogRecord;
use crate::sink::{LogSink, SinkError};
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use std::fmt;

/// Log API endpoint for accounts in the US data center.
pub const US_LOG_ENDPOINT: &str = "https://log-api.newrelic.com/log/v1";

/// Log API endpoint for accounts in the EU data center.
pub const EU_LOG_ENDPOINT: &str = "https://log-api.eu.newrelic.com/log/v1";

/// Value of the `logtype` attribute on every payload.
pub const LOG_TYPE: &str = "application";

/// Prefix given to record fields whose key collides with a reserved one.
pub const COLLISION_PREFIX: &str = "attr.";

const RESERVED_KEYS: [&str; 6] = ["time", "message", "level", "timestamp", "logtype", "source"];

/// Configuration for [`NewRelicSink`].
#[derive(Clone)]
pub struct NewRelicConfig {
    /// Full Log API URL, e.g. [`US_LOG_ENDPOINT`].
    pub endpoint: String,
    /// License key sent as `Api-Key`.
    pub license_key: String,
}

impl NewRelicConfig {
    pub fn new(endpoint: impl Into<String>, license_key: impl Into<String>) -> Self {
        NewRelicConfig {
            endpoint: endpoint.into(),
            license_key: license_key.into(),
        }
    }

    pub fn us(license_key: impl Into<String>) -> Self {
        Self::new(US_LOG_ENDPOINT, license_key)
    }

    pub fn eu(license_key: impl Into<String>) -> Self {
        Self::new(EU_LOG_ENDPOINT, license_key)
    }

    /// Read `NEW_RELIC_LICENSE_KEY` and, optionally, `NEW_RELIC_LOG_ENDPOINT`.
    ///
    /// **Returns**
    /// - `None` if no license key is set.
    pub fn from_env() -> Option<Self> {
        let license_key = env_opt(NEW_RELIC_LICENSE_KEY_ENV)?;
        Some(Self::new(env_or(NEW_RELIC_LOG_ENDPOINT_ENV, US_LOG_ENDPOINT), license_key))
    }
}

impl fmt::Debug for NewRelicConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewRelicConfig")
            .field("endpoint", &self.endpoint)
            .field("license_key", &"<redacted>")
            .finish()
    }
}

/// New Relic implementation of [`LogSink`] using the HTTP Log API.
///
/// Every record is posted on its own as a flat JSON object. The API
/// answers `202 Accepted` on success; any other status is a failure.
#[derive(Clone)]
pub struct NewRelicSink {
    client: Client,
    config: NewRelicConfig,
}

impl NewRelicSink {
    /// Construct a new sink instance using the provided configuration.
    ///
    /// **Parameters**
    /// - `config`: [`NewRelicConfig`] with endpoint and license key.
    ///
    /// **Returns**
    /// - A ready-to-use [`NewRelicSink`] that can be passed into
    ///   [`crate::logger::Logger::new`] or [`crate::init::init_tracing`].
    pub fn new(config: NewRelicConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    /// Like [`NewRelicSink::new`], reusing an existing HTTP client.
    pub fn with_client(config: NewRelicConfig, client: Client) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &NewRelicConfig {
        &self.config
    }

    /// Flatten a record into the Log API payload.
    ///
    /// Reserved keys: `time` (RFC 3339), `timestamp` (epoch seconds),
    /// `message`, `level`, `logtype` and `source` (`function` + `line`).
    /// Record fields follow; a field named like a reserved key is stored
    /// under [`COLLISION_PREFIX`] + key instead of replacing it. If that
    /// key is taken by another field, the prefix is repeated until the
    /// key is free, so every field value reaches the payload.
    pub fn build_payload(record: &LogRecord) -> Map<String, Value> {
        let function = record
            .source
            .function
            .clone()
            .unwrap_or_else(|| record.target.clone());

        let mut payload = Map::with_capacity(RESERVED_KEYS.len() + record.fields.len());
        payload.insert(
            "time".to_string(),
            Value::String(record.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        );
        payload.insert("message".to_string(), Value::String(record.message.clone()));
        payload.insert("level".to_string(), Value::String(record.level.as_str().to_string()));
        payload.insert("timestamp".to_string(), Value::from(record.timestamp.timestamp()));
        payload.insert("logtype".to_string(), Value::String(LOG_TYPE.to_string()));
        payload.insert(
            "source".to_string(),
            json!({
                "function": function,
                "line": record.source.line.unwrap_or(0),
            }),
        );

        let (colliding, plain): (Vec<_>, Vec<_>) = record
            .fields
            .iter()
            .partition(|(key, _)| RESERVED_KEYS.contains(&key.as_str()));

        for (key, value) in plain {
            payload.insert(key.clone(), value.clone());
        }
        for (key, value) in colliding {
            let mut renamed = format!("{COLLISION_PREFIX}{key}");
            while payload.contains_key(&renamed) {
                renamed.insert_str(0, COLLISION_PREFIX);
            }
            payload.insert(renamed, value.clone());
        }
        payload
    }
}

#[async_trait]
impl LogSink for NewRelicSink {
    async fn send(&self, record: &LogRecord) -> Result<(), SinkError> {
        let body = serde_json::to_vec(&Self::build_payload(record))?;
        let resp = self
            .client
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header("Api-Key", &self.config.license_key)
            .body(body)
            .send()
            .await?;

        if resp.status() == StatusCode::ACCEPTED {
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(SinkError::Status { status, body })
        }
    }

    fn name(&self) -> &str {
        "newrelic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Source;
    use chrono::{TimeZone, Utc};
    use tracing::Level;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record() -> LogRecord {
        LogRecord::new(Level::WARN, "disk almost full")
            .at(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap())
            .with_source(Source {
                function: Some("storage::monitor".to_string()),
                file: Some("src/monitor.rs".to_string()),
                line: Some(88),
            })
            .with_field("k1", "v1")
            .with_field("k2", json!({"nested": [1, 2]}))
    }

    #[test]
    fn payload_is_flat_and_keeps_every_field() {
        let payload = NewRelicSink::build_payload(&record());

        let mut keys: Vec<&str> = payload.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            ["k1", "k2", "level", "logtype", "message", "source", "time", "timestamp"]
        );
        assert_eq!(payload["time"], json!("2024-03-01T12:30:00Z"));
        assert_eq!(payload["timestamp"], json!(1_709_296_200));
        assert_eq!(payload["message"], json!("disk almost full"));
        assert_eq!(payload["level"], json!("WARN"));
        assert_eq!(payload["logtype"], json!("application"));
        assert_eq!(payload["source"], json!({"function": "storage::monitor", "line": 88}));
        assert_eq!(payload["k1"], json!("v1"));
        assert_eq!(payload["k2"], json!({"nested": [1, 2]}));
    }

    #[test]
    fn colliding_fields_are_prefixed() {
        let record = LogRecord::new(Level::INFO, "real message")
            .with_field("message", "from field")
            .with_field("level", 3);
        let payload = NewRelicSink::build_payload(&record);

        assert_eq!(payload["message"], json!("real message"));
        assert_eq!(payload["level"], json!("INFO"));
        assert_eq!(payload["attr.message"], json!("from field"));
        assert_eq!(payload["attr.level"], json!(3));
    }

    #[test]
    fn prefixed_key_already_taken_keeps_both_values() {
        let record = LogRecord::new(Level::INFO, "real message")
            .with_field("attr.message", "A")
            .with_field("message", "B");
        let payload = NewRelicSink::build_payload(&record);

        assert_eq!(payload["message"], json!("real message"));
        assert_eq!(payload["attr.message"], json!("A"));
        assert_eq!(payload["attr.attr.message"], json!("B"));
    }

    #[test]
    fn unknown_source_falls_back_to_target() {
        let record = LogRecord::new(Level::INFO, "x").with_target("billing");
        let payload = NewRelicSink::build_payload(&record);
        assert_eq!(payload["source"], json!({"function": "billing", "line": 0}));
    }

    #[test]
    fn debug_output_hides_license_key() {
        let config = NewRelicConfig::eu("secret-key");
        let printed = format!("{config:?}");
        assert!(printed.contains(EU_LOG_ENDPOINT));
        assert!(!printed.contains("secret-key"));
    }

    #[tokio::test]
    async fn posts_json_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/log/v1"))
            .and(header("Api-Key", "license-123"))
            .and(header("Content-Type", "application/json"))
            .and(body_partial_json(json!({
                "message": "disk almost full",
                "logtype": "application",
                "k1": "v1",
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let sink = NewRelicSink::new(NewRelicConfig::new(format!("{}/log/v1", server.uri()), "license-123"));
        sink.send(&record()).await.unwrap();
    }

    #[tokio::test]
    async fn non_accepted_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok but not accepted"))
            .mount(&server)
            .await;

        let sink = NewRelicSink::new(NewRelicConfig::new(server.uri(), "key"));
        match sink.send(&record()).await {
            Err(SinkError::Status { status, body }) => {
                assert_eq!(status, 200);
                assert_eq!(body, "ok but not accepted");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let sink = NewRelicSink::new(NewRelicConfig::new("http://127.0.0.1:1/log/v1", "key"));
        let err = sink.send(&record()).await.unwrap_err();
        assert!(matches!(err, SinkError::Transport(_)));
    }
}
