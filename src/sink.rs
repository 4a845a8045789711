use crate::record::LogRecord;
use async_trait::async_trait;
use std::error::Error;
use std::time::Duration;

/// Remote destination for [`LogRecord`]s.
///
/// Implementations transport a record to a concrete backend (New Relic,
/// a log collector, a database, ...). The fan-out handler calls `send`
/// from a dedicated Tokio task per record and sink, never on the
/// application thread, and never awaits the outcome in the log call.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Send a single log record to the underlying backend.
    ///
    /// **Parameters**
    /// - `record`: the record as emitted, with the emitting handler's
    ///   persistent fields already merged in.
    ///
    /// **Returns**
    /// - `Ok(())` if the backend accepted the record.
    /// - `Err(..)` if the backend failed (network error, serialization
    ///   error, HTTP status, etc.). The error is not retried; it is
    ///   reported through the rate-limited local failure log.
    async fn send(&self, record: &LogRecord) -> Result<(), SinkError>;

    /// Name used when a failure of this sink is reported locally.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Failure of a single [`LogSink::send`] call.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[cfg(feature = "newrelic")]
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status code: {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("send did not finish within {0:?}")]
    Timeout(Duration),

    #[error("sink panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(Box<dyn Error + Send + Sync>),
}

impl SinkError {
    /// Wrap any error raised by a custom sink.
    pub fn other(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        SinkError::Other(err.into())
    }
}
