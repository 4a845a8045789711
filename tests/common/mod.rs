#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};
use tracing_log_fanout::record::LogRecord;
use tracing_log_fanout::sink::{LogSink, SinkError};

/// In-memory writer shared between the logger and the test.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    pub fn boxed(&self) -> Option<Box<dyn Write + Send>> {
        Some(Box::new(self.clone()))
    }

    pub fn lines(&self) -> Vec<Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    pub fn with_msg(&self, msg: &str) -> Vec<Value> {
        self.lines()
            .into_iter()
            .filter(|l| l["msg"] == msg)
            .collect()
    }
}

/// Sink that keeps every record it receives.
#[derive(Default)]
pub struct RecordingSink {
    pub records: Mutex<Vec<LogRecord>>,
}

impl RecordingSink {
    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl LogSink for RecordingSink {
    async fn send(&self, record: &LogRecord) -> Result<(), SinkError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Sink that fails every send.
#[derive(Default)]
pub struct FailingSink {
    pub calls: AtomicUsize,
}

#[async_trait]
impl LogSink for FailingSink {
    async fn send(&self, _record: &LogRecord) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Status {
            status: 503,
            body: "ingest unavailable".to_string(),
        })
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Sink that never answers in time.
pub struct SlowSink;

#[async_trait]
impl LogSink for SlowSink {
    async fn send(&self, _record: &LogRecord) -> Result<(), SinkError> {
        sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Poll `cond` until it holds, failing the test after a few seconds.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
