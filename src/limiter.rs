use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

/// Leaky-bucket counter of sink failures that were recently logged.
///
/// Each locally logged failure increments the counter; a background task
/// takes one off per decay interval. The consumption loop stops logging
/// failures while the counter is above its threshold, so a dead sink
/// produces a short burst of failure logs and then goes quiet until the
/// bucket drains.
#[derive(Debug, Default)]
pub struct ErrorRateLimiter {
    count: AtomicUsize,
}

impl ErrorRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Subtract one; a counter at zero stays at zero.
    pub fn decrement(&self) {
        let _ = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Spawn the decay task on `runtime`.
    ///
    /// The first decay happens one `period` after the call. The task ends
    /// once `shutdown` turns `true` or its sender is dropped.
    pub fn spawn_decay(
        self: &Arc<Self>,
        runtime: &Handle,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        runtime.spawn(async move {
            if *shutdown.borrow() {
                return;
            }
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if limiter.get() > 0 {
                            limiter.decrement();
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
