//! Background eviction of idle buckets.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use super::limiter::RateLimiter;

/// Spawn a task that evicts buckets idle for at least `grace_period`, every `interval`.
///
/// The task runs until the returned handle is aborted.
pub fn spawn_eviction_task(
    limiter: Arc<RateLimiter>,
    interval: Duration,
    grace_period: Duration,
) -> JoinHandle<()> {
    info!(
        interval = ?interval,
        grace_period = ?grace_period,
        "Starting bucket eviction task"
    );

    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let evicted = limiter.evict_stale(grace_period);
            if evicted > 0 {
                info!(
                    evicted = evicted,
                    buckets = limiter.bucket_count(),
                    "Evicted idle buckets"
                );
            } else {
                debug!(buckets = limiter.bucket_count(), "No idle buckets to evict");
            }
        }
    })
}
