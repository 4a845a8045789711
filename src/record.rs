use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::panic::Location;
use tracing::Level;

/// Call-site identity of a [`LogRecord`].
///
/// Every part is optional: records bridged from `tracing` know their
/// module path, records built through [`crate::logger::Logger`] only know
/// file and line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Source {
    /// Capture file and line of the (tracked) caller.
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Source {
            function: None,
            file: Some(location.file().to_string()),
            line: Some(location.line()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.function.is_none() && self.file.is_none() && self.line.is_none()
    }
}

/// Snapshot of a single log event.
///
/// A record is built once per log call and then only read: handlers take
/// it by reference and the fan-out layer shares one `Arc<LogRecord>`
/// between all sink tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(serialize_with = "serialize_level")]
    pub level: Level,
    pub target: String,
    pub message: String,
    pub source: Source,
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl LogRecord {
    /// New record stamped with the current time and no fields.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        LogRecord {
            timestamp: Utc::now(),
            level,
            target: String::new(),
            message: message.into(),
            source: Source::default(),
            fields: BTreeMap::new(),
        }
    }

    /// Like [`LogRecord::new`], with the caller's file and line as source.
    #[track_caller]
    pub fn caller(level: Level, message: impl Into<String>) -> Self {
        Self::new(level, message).with_source(Source::caller())
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    /// Add one field. A key that is already present is replaced.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_fields<I, K>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        self.fields
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v)));
        self
    }
}

fn serialize_level<S: Serializer>(level: &Level, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(level.as_str())
}
