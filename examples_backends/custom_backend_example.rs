use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::{sleep, Duration};
use tracing::{error, info};
use tracing_log_fanout::{
    init::init_tracing,
    record::LogRecord,
    sink::{LogSink, SinkError},
};

/// Example of integrating a completely custom backend by implementing
/// the `LogSink` trait directly. Imagine this talks to some
/// proprietary collector for which this crate does not provide a
/// built-in sink.
struct MyCollectorSink;

#[async_trait]
impl LogSink for MyCollectorSink {
    async fn send(&self, record: &LogRecord) -> Result<(), SinkError> {
        // Here you would call your own client library for the target.
        // For the sake of example we just print the record.
        println!("[my-collector] {:?}", record);
        Ok(())
    }

    fn name(&self) -> &str {
        "my-collector"
    }
}

/// A sink that is always down, to show the rate-limited failure log.
struct DownSink;

#[async_trait]
impl LogSink for DownSink {
    async fn send(&self, _record: &LogRecord) -> Result<(), SinkError> {
        Err(SinkError::other("connection refused"))
    }

    fn name(&self) -> &str {
        "down"
    }
}

#[tokio::main]
async fn main() {
    let sinks: Vec<Arc<dyn LogSink>> = vec![
        Arc::new(MyCollectorSink) as Arc<dyn LogSink>,
        Arc::new(DownSink) as Arc<dyn LogSink>,
    ];

    let logger = init_tracing(None, sinks).expect("init tracing");

    info!("custom backend example started");
    for attempt in 0..10 {
        error!(collector = "my-collector", attempt, "simulated error sent via custom backend");
    }

    // Only the first handful of `down` failures show up locally.
    sleep(Duration::from_millis(500)).await;
    logger.shutdown().await;
}
