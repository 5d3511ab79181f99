//! Opt-in background eviction of idle buckets.
//!
//! Without a sweeper the store keeps every key it has ever seen. The sweeper
//! bounds memory by periodically dropping buckets that have refilled to
//! capacity; see [`TokenBucket::evict_idle`].

use crate::rate_limit::store::BucketStore;
use crate::rate_limit::strategies::TokenBucket;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shortest sweep period; shorter requests are raised to this.
pub const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(1);

/// Handle to a running sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for the task to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Spawn a task that calls [`TokenBucket::evict_idle`] with `idle_for` every
/// `every` (at least [`MIN_SWEEP_PERIOD`]). Must be called from within a
/// tokio runtime.
pub fn spawn_idle_sweeper<S>(
    limiter: TokenBucket<S>,
    every: Duration,
    idle_for: Duration,
) -> SweeperHandle
where
    S: BucketStore + 'static,
{
    let every = every.max(MIN_SWEEP_PERIOD);
    let (shutdown, mut stop) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = limiter.evict_idle(idle_for);
                    tracing::trace!(evicted, tracked = limiter.store().len(), "idle sweep");
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("idle sweeper stopped");
    });
    SweeperHandle { shutdown, task: Some(task) }
}
