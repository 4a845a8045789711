use crate::layer::FanoutLayer;
use crate::logger::{BuildError, FanoutConfig, Logger};
use crate::sink::LogSink;
use std::io::Write;
use std::sync::Arc;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Error returned by [`init_tracing`] / [`init_tracing_with_config`].
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("failed to install global subscriber: {0}")]
    SetGlobal(#[from] SetGlobalDefaultError),
}

/// Install a [`Registry`] with a [`FanoutLayer`] as the global `tracing`
/// subscriber.
///
/// **Parameters**
/// - `writer`: destination of the local JSON lines; stdout if `None`.
/// - `sinks`: remote sinks every event is forwarded to.
/// - `config`: [`FanoutConfig`] for channel size, timeouts and the
///   failure rate limiter.
///
/// **Returns**
/// - The [`Logger`] behind the layer, for direct use and for
///   [`Logger::shutdown`].
pub fn init_tracing_with_config(
    writer: Option<Box<dyn Write + Send>>,
    sinks: Vec<Arc<dyn LogSink>>,
    config: FanoutConfig,
) -> Result<Logger, InitError> {
    let logger = Logger::with_config(writer, sinks, config)?;
    let subscriber = Registry::default().with(FanoutLayer::new(logger.clone()));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(logger)
}

/// Initialize tracing with sensible defaults.
///
/// Equivalent to calling [`init_tracing_with_config`] with
/// [`FanoutConfig::default`]. This is the recommended entrypoint for
/// typical services.
pub fn init_tracing(
    writer: Option<Box<dyn Write + Send>>,
    sinks: Vec<Arc<dyn LogSink>>,
) -> Result<Logger, InitError> {
    init_tracing_with_config(writer, sinks, FanoutConfig::default())
}
