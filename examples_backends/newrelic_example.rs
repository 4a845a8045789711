use serde_json::json;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use tracing_log_fanout::layer::FanoutLayer;
use tracing_log_fanout::logger::Logger;
use tracing_log_fanout::newrelic::{NewRelicConfig, NewRelicSink};
use tracing_log_fanout::sink::LogSink;

#[tokio::main]
async fn main() {
    let config = NewRelicConfig::from_env().expect("NEW_RELIC_LICENSE_KEY must be set");
    let sink: Arc<dyn LogSink> = Arc::new(NewRelicSink::new(config));

    let logger = Logger::new(None, vec![sink]).expect("build logger");
    let auth = logger.with(&[("service", json!("auth"))]);

    auth.info("starting service", &[]).expect("write log");
    auth.error(
        "authentication failed",
        &[("user_id", json!(42)), ("reason", json!("invalid password"))],
    )
    .expect("write log");

    // The same logger also works behind `tracing` macros.
    let subscriber = Registry::default().with(FanoutLayer::new(logger.clone()));
    tracing::subscriber::with_default(subscriber, || {
        info!(region = "eu-west", "cache warmed");
        error!(order_id = "o-17", "payment provider unreachable");
    });

    sleep(Duration::from_secs(2)).await;
    logger.shutdown().await;
}
