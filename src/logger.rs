use crate::fanout::{drain_failures, FanoutHandler, FanoutStats, FanoutStatsSnapshot, INTERNAL_TARGET};
use crate::handler::{HandleError, Handler};
use crate::json::{JsonHandler, JsonOptions};
use crate::limiter::ErrorRateLimiter;
use crate::record::{LogRecord, Source};
use crate::sink::LogSink;
use serde_json::Value;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::Level;

/// Configuration of a fan-out [`Logger`].
///
/// **Fields**
/// - `error_channel_capacity`: number of sink failures that may wait for
///   the consumption loop; further failures are dropped.
/// - `send_timeout`: upper bound for a single sink send.
/// - `error_log_threshold`: failures are no longer logged locally while
///   the rate limiter counts more than this many.
/// - `decay_interval`: period after which the rate limiter forgets one
///   logged failure.
/// - `min_level`: least severe level written by the default JSON handler.
/// - `add_source`: whether the JSON handler writes the call site.
#[derive(Clone, Debug)]
pub struct FanoutConfig {
    pub error_channel_capacity: usize,
    pub send_timeout: Duration,
    pub error_log_threshold: usize,
    pub decay_interval: Duration,
    pub min_level: Level,
    pub add_source: bool,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            error_channel_capacity: 1024,
            send_timeout: Duration::from_secs(10),
            error_log_threshold: 5,
            decay_interval: Duration::from_secs(1),
            min_level: Level::INFO,
            add_source: true,
        }
    }
}

impl FanoutConfig {
    // Enforce minimal thresholds to avoid degenerate configs.
    fn clamped(self) -> Self {
        let floor = Duration::from_millis(10);
        Self {
            error_channel_capacity: self.error_channel_capacity.max(16),
            send_timeout: self.send_timeout.max(floor),
            decay_interval: self.decay_interval.max(floor),
            ..self
        }
    }

    fn json_options(&self) -> JsonOptions {
        JsonOptions {
            min_level: self.min_level,
            add_source: self.add_source,
        }
    }
}

/// Error returned when a [`Logger`] cannot be built.
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("a tokio runtime is required for the background tasks: {0}")]
    NoRuntime(#[from] TryCurrentError),
}

// Background tasks of one logger. Dropping this (with the last logger
// handle) drops the shutdown sender, which ends both tasks.
struct Background {
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
    limiter: Arc<ErrorRateLimiter>,
    stats: Arc<FanoutStats>,
}

/// Structured logger that writes locally and fans out to remote sinks.
///
/// Cheap to clone; clones and loggers derived with [`Logger::with`] /
/// [`Logger::with_group`] share the sinks, the error channel and the
/// background tasks.
#[derive(Clone)]
pub struct Logger {
    handler: Arc<dyn Handler>,
    background: Arc<Background>,
}

impl Logger {
    /// Build a logger writing JSON lines to `writer` (stdout if `None`)
    /// and forwarding every record to `sinks`.
    ///
    /// Must be called from within a Tokio runtime; the decay task and the
    /// failure consumption loop are spawned on it.
    pub fn new(writer: Option<Box<dyn Write + Send>>, sinks: Vec<Arc<dyn LogSink>>) -> Result<Self, BuildError> {
        Self::with_config(writer, sinks, FanoutConfig::default())
    }

    pub fn with_config(
        writer: Option<Box<dyn Write + Send>>,
        sinks: Vec<Arc<dyn LogSink>>,
        config: FanoutConfig,
    ) -> Result<Self, BuildError> {
        let writer = writer.unwrap_or_else(|| Box::new(io::stdout()));
        let base = JsonHandler::from_boxed(writer, config.json_options());
        Self::with_base_handler(Arc::new(base), sinks, config)
    }

    /// Build a logger around a custom base handler. `min_level` and
    /// `add_source` of `config` are not used; `base` decides those.
    pub fn with_base_handler(
        base: Arc<dyn Handler>,
        sinks: Vec<Arc<dyn LogSink>>,
        config: FanoutConfig,
    ) -> Result<Self, BuildError> {
        let config = config.clamped();
        let runtime = Handle::try_current()?;

        let (errors_tx, errors_rx) = mpsc::channel(config.error_channel_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let limiter = Arc::new(ErrorRateLimiter::new());
        let stats = Arc::new(FanoutStats::default());
        let closed = Arc::new(AtomicBool::new(false));
        let has_sinks = !sinks.is_empty();

        let handler = FanoutHandler::new(
            Arc::clone(&base),
            sinks,
            errors_tx,
            runtime.clone(),
            config.send_timeout,
            Arc::clone(&closed),
            Arc::clone(&stats),
        );

        let mut tasks = vec![limiter.spawn_decay(&runtime, config.decay_interval, shutdown_rx.clone())];
        if has_sinks {
            tasks.push(runtime.spawn(drain_failures(
                errors_rx,
                base,
                Arc::clone(&limiter),
                config.error_log_threshold,
                Arc::clone(&stats),
                shutdown_rx,
            )));
        }

        Ok(Logger {
            handler: Arc::new(handler),
            background: Arc::new(Background {
                shutdown: shutdown_tx,
                tasks: Mutex::new(tasks),
                closed,
                limiter,
                stats,
            }),
        })
    }

    /// The fan-out handler (or a handler derived from it).
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub fn enabled(&self, level: Level) -> bool {
        self.handler.enabled(level)
    }

    /// Log `message` with `fields` at `level`.
    ///
    /// Returns only local write errors; sink outcomes never surface here.
    #[track_caller]
    pub fn log(&self, level: Level, message: &str, fields: &[(&str, Value)]) -> Result<(), HandleError> {
        if !self.enabled(level) {
            return Ok(());
        }
        let record = LogRecord::new(level, message)
            .with_source(Source::caller())
            .with_fields(fields.iter().map(|(k, v)| (*k, v.clone())));
        self.handler.handle(&record)
    }

    /// Log a prepared record, if its level is enabled.
    pub fn log_record(&self, record: &LogRecord) -> Result<(), HandleError> {
        if !self.enabled(record.level) {
            return Ok(());
        }
        self.handler.handle(record)
    }

    #[track_caller]
    pub fn debug(&self, message: &str, fields: &[(&str, Value)]) -> Result<(), HandleError> {
        self.log(Level::DEBUG, message, fields)
    }

    #[track_caller]
    pub fn info(&self, message: &str, fields: &[(&str, Value)]) -> Result<(), HandleError> {
        self.log(Level::INFO, message, fields)
    }

    #[track_caller]
    pub fn warn(&self, message: &str, fields: &[(&str, Value)]) -> Result<(), HandleError> {
        self.log(Level::WARN, message, fields)
    }

    #[track_caller]
    pub fn error(&self, message: &str, fields: &[(&str, Value)]) -> Result<(), HandleError> {
        self.log(Level::ERROR, message, fields)
    }

    /// Derived logger adding `fields` to every record. `self` is unchanged.
    pub fn with(&self, fields: &[(&str, Value)]) -> Logger {
        let fields = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Logger {
            handler: self.handler.with_fields(fields),
            background: Arc::clone(&self.background),
        }
    }

    /// Derived logger nesting later fields under `name`. `self` is unchanged.
    pub fn with_group(&self, name: &str) -> Logger {
        Logger {
            handler: self.handler.with_group(name),
            background: Arc::clone(&self.background),
        }
    }

    pub fn stats(&self) -> FanoutStatsSnapshot {
        self.background.stats.snapshot()
    }

    /// Current value of the failure rate limiter.
    pub fn error_count(&self) -> usize {
        self.background.limiter.get()
    }

    pub fn is_shut_down(&self) -> bool {
        self.background.closed.load(Ordering::Acquire)
    }

    /// Stop fanning out and end the background tasks.
    ///
    /// Records logged afterwards are still written locally but no longer
    /// sent to sinks. Sends already in flight run to completion or to their
    /// timeout; their failures are discarded. Calling this again is a no-op.
    pub async fn shutdown(&self) {
        self.background.closed.store(true, Ordering::Release);
        self.background.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *self.background.tasks.lock().await);
        for task in tasks {
            if let Err(err) = task.await {
                tracing::debug!(target: INTERNAL_TARGET, error = %err, "background task ended abnormally");
            }
        }
    }
}
