use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::error;

use tracing_log_fanout::init::init_tracing_with_config;
use tracing_log_fanout::logger::FanoutConfig;
use tracing_log_fanout::noop_sink::NoopSink;
use tracing_log_fanout::sink::LogSink;

#[tokio::main]
async fn main() {
    let sink: Arc<dyn LogSink> = Arc::new(NoopSink::default());

    let config = FanoutConfig {
        error_channel_capacity: 50_000,
        send_timeout: Duration::from_secs(2),
        add_source: false,
        ..FanoutConfig::default()
    };

    let logger = init_tracing_with_config(Some(Box::new(io::sink())), vec![sink], config)
        .expect("init tracing");

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "custom load test error");
    }

    let elapsed = start.elapsed();
    println!("custom config: logged {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    sleep(Duration::from_secs(2)).await;
    println!("{:?}", logger.stats());
    logger.shutdown().await;
}
