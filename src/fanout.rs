use crate::handler::{HandleError, Handler, Scope};
use crate::limiter::ErrorRateLimiter;
use crate::record::LogRecord;
use crate::sink::{LogSink, SinkError};
use serde_json::Value;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration};
use tracing::Level;

/// Target of this crate's own diagnostics. [`crate::layer::FanoutLayer`]
/// never forwards events with this target.
pub const INTERNAL_TARGET: &str = "tracing_log_fanout::internal";

/// Value of the `origin` field on locally logged sink failures.
pub const ORIGIN: &str = "tracing-log-fanout";

/// Message of locally logged sink failures.
pub const FAILURE_MESSAGE: &str = "log sink failure";

tokio::task_local! {
    static IN_SINK_SEND: ();
}

/// Whether the caller is running inside a sink's `send`.
///
/// Events a sink emits while sending must not be fed back into the
/// fan-out, or every send would trigger more sends.
pub fn in_sink_send() -> bool {
    IN_SINK_SEND.try_with(|_| ()).is_ok()
}

/// A failed send, on its way to the consumption loop.
#[derive(Debug)]
pub struct SinkFailure {
    pub sink: String,
    pub error: SinkError,
}

/// Counters describing the fan-out traffic of one logger.
#[derive(Debug, Default)]
pub struct FanoutStats {
    /// Sink sends started.
    pub dispatched: AtomicU64,
    /// Sends that returned an error, timed out or panicked.
    pub failures: AtomicU64,
    /// Failures lost because the error channel was full or closed.
    pub dropped: AtomicU64,
    /// Failures written to the local log.
    pub reported: AtomicU64,
    /// Failures swallowed by the rate limiter.
    pub suppressed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutStatsSnapshot {
    pub dispatched: u64,
    pub failures: u64,
    pub dropped: u64,
    pub reported: u64,
    pub suppressed: u64,
}

impl FanoutStats {
    pub fn snapshot(&self) -> FanoutStatsSnapshot {
        FanoutStatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            reported: self.reported.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
        }
    }
}

// State shared by a fan-out handler and every handler derived from it.
struct Dispatch {
    sinks: Arc<[Arc<dyn LogSink>]>,
    errors: mpsc::Sender<SinkFailure>,
    runtime: Handle,
    send_timeout: Duration,
    closed: Arc<AtomicBool>,
    stats: Arc<FanoutStats>,
}

/// Decorator that forwards every record to its base handler and, in
/// parallel, to every attached [`LogSink`].
///
/// Sink sends are fire-and-forget: each runs in its own Tokio task and its
/// outcome never reaches the caller of [`Handler::handle`]. Failures go to
/// the shared error channel instead.
#[derive(Clone)]
pub struct FanoutHandler {
    base: Arc<dyn Handler>,
    dispatch: Arc<Dispatch>,
    scope: Scope,
}

impl FanoutHandler {
    pub(crate) fn new(
        base: Arc<dyn Handler>,
        sinks: Vec<Arc<dyn LogSink>>,
        errors: mpsc::Sender<SinkFailure>,
        runtime: Handle,
        send_timeout: Duration,
        closed: Arc<AtomicBool>,
        stats: Arc<FanoutStats>,
    ) -> Self {
        FanoutHandler {
            base,
            dispatch: Arc::new(Dispatch {
                sinks: sinks.into(),
                errors,
                runtime,
                send_timeout,
                closed,
                stats,
            }),
            scope: Scope::default(),
        }
    }

    /// The wrapped handler.
    pub fn base(&self) -> &Arc<dyn Handler> {
        &self.base
    }

    pub fn sinks(&self) -> &[Arc<dyn LogSink>] {
        &self.dispatch.sinks
    }

    fn derive(&self, base: Arc<dyn Handler>, scope: Scope) -> Arc<dyn Handler> {
        Arc::new(FanoutHandler {
            base,
            dispatch: Arc::clone(&self.dispatch),
            scope,
        })
    }

    // Sinks see the record with this handler's persistent fields merged in,
    // the same fields the base handler writes.
    fn scoped(&self, record: &LogRecord) -> LogRecord {
        let mut scoped = record.clone();
        if !self.scope.is_empty() {
            scoped.fields = self.scope.resolve(&record.fields).into_iter().collect();
        }
        scoped
    }

    fn dispatch(&self, record: &LogRecord) {
        let dispatch = &self.dispatch;
        if dispatch.sinks.is_empty() || dispatch.closed.load(Ordering::Acquire) {
            return;
        }

        let record = Arc::new(self.scoped(record));
        for sink in dispatch.sinks.iter() {
            let sink = Arc::clone(sink);
            let record = Arc::clone(&record);
            let errors = dispatch.errors.clone();
            let stats = Arc::clone(&dispatch.stats);
            let limit = dispatch.send_timeout;

            stats.dispatched.fetch_add(1, Ordering::Relaxed);
            dispatch.runtime.spawn(async move {
                let Err(error) = send_isolated(Arc::clone(&sink), record, limit).await else {
                    return;
                };
                stats.failures.fetch_add(1, Ordering::Relaxed);
                let failure = SinkFailure {
                    sink: sink.name().to_string(),
                    error,
                };
                if let Err(err) = errors.try_send(failure) {
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(target: INTERNAL_TARGET, error = %err, "dropping sink failure");
                }
            });
        }
    }
}

impl Handler for FanoutHandler {
    fn enabled(&self, level: Level) -> bool {
        self.base.enabled(level)
    }

    fn handle(&self, record: &LogRecord) -> Result<(), HandleError> {
        self.dispatch(record);
        self.base.handle(record)
    }

    fn with_fields(&self, fields: Vec<(String, Value)>) -> Arc<dyn Handler> {
        let scope = self.scope.with_fields(fields.clone());
        self.derive(self.base.with_fields(fields), scope)
    }

    fn with_group(&self, name: &str) -> Arc<dyn Handler> {
        self.derive(self.base.with_group(name), self.scope.with_group(name))
    }
}

/// Run one send in its own task so a panic stays inside it, and give up
/// after `limit`.
async fn send_isolated(
    sink: Arc<dyn LogSink>,
    record: Arc<LogRecord>,
    limit: Duration,
) -> Result<(), SinkError> {
    let mut task = tokio::spawn(IN_SINK_SEND.scope((), async move { sink.send(&record).await }));
    match timeout(limit, &mut task).await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) if err.is_panic() => Err(SinkError::Panicked(panic_message(err.into_panic()))),
        Ok(Err(err)) => Err(SinkError::other(err)),
        Err(_) => {
            task.abort();
            Err(SinkError::Timeout(limit))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Consumption loop: the single reader of the error channel.
///
/// Runs until `shutdown` turns `true`, its sender is dropped, or every
/// failure sender is gone.
pub(crate) async fn drain_failures(
    mut failures: mpsc::Receiver<SinkFailure>,
    local: Arc<dyn Handler>,
    limiter: Arc<ErrorRateLimiter>,
    threshold: usize,
    stats: Arc<FanoutStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    if *shutdown.borrow() {
        return;
    }
    loop {
        let failure = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            next = failures.recv() => match next {
                Some(failure) => failure,
                None => break,
            },
        };
        report_failure(&failure, local.as_ref(), &limiter, threshold, &stats);
    }
    tracing::debug!(target: INTERNAL_TARGET, "sink failure loop stopped");
}

/// Rate-limit gate for one failure. Returns whether it was logged.
///
/// The failure goes to `local` only, never back through the sinks, so a
/// failure log cannot cause another failure.
pub(crate) fn report_failure(
    failure: &SinkFailure,
    local: &dyn Handler,
    limiter: &ErrorRateLimiter,
    threshold: usize,
    stats: &FanoutStats,
) -> bool {
    if limiter.get() > threshold {
        stats.suppressed.fetch_add(1, Ordering::Relaxed);
        return false;
    }

    let record = LogRecord::new(Level::ERROR, FAILURE_MESSAGE)
        .with_target(INTERNAL_TARGET)
        .with_field("error", failure.error.to_string())
        .with_field("sink", failure.sink.clone())
        .with_field("origin", ORIGIN);
    if let Err(err) = local.handle(&record) {
        eprintln!("{ORIGIN}: failed to write sink failure: {err}");
    }
    limiter.increment();
    stats.reported.fetch_add(1, Ordering::Relaxed);
    true
}
