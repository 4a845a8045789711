use crate::record::LogRecord;
use crate::sink::{LogSink, SinkError};
use async_trait::async_trait;

/// A sink that simply drops all records.
///
/// Useful for measuring the overhead of the fan-out itself without any
/// external I/O, and for tests that only care about the local output.
#[derive(Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl LogSink for NoopSink {
    async fn send(&self, _record: &LogRecord) -> Result<(), SinkError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}
