pub mod record;
pub mod sink;
pub mod handler;
pub mod json;
pub mod limiter;
pub mod fanout;
pub mod logger;
pub mod layer;

#[cfg(feature = "newrelic")]
pub mod newrelic;

pub mod env;
pub mod init;
pub mod noop_sink;
