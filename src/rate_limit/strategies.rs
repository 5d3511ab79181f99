use crate::clock::{Clock, MonotonicClock};
use crate::config::LimiterConfig;
use crate::rate_limit::store::{lock_bucket, BucketStore, InMemoryBucketStore};
use crate::rate_limit::{Decision, RateLimiter};
use std::sync::Arc;
use std::time::Duration;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// A token-bucket admission controller.
///
/// Each key's bucket holds up to `capacity` tokens and refills continuously at
/// `refill_rate` tokens per second. Refill is computed lazily at check time, so
/// idle keys cost nothing between checks. Each admitted request consumes one
/// token; a request arriving with less than one token is denied and consumes
/// nothing.
///
/// Clones share the same store and clock.
#[derive(Debug)]
pub struct TokenBucket<S = InMemoryBucketStore> {
    store: Arc<S>,
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for TokenBucket<S> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), config: self.config, clock: self.clock.clone() }
    }
}

impl TokenBucket<InMemoryBucketStore> {
    /// Controller over a fresh in-memory store.
    pub fn in_memory(config: LimiterConfig) -> Self {
        Self::new(config, InMemoryBucketStore::new())
    }
}

impl<S> TokenBucket<S>
where
    S: BucketStore + 'static,
{
    /// Create a controller backed by `store`.
    ///
    /// `config` is already validated, so a controller can never exist with a
    /// non-positive capacity or refill rate.
    ///
    /// # Examples
    /// ```
    /// use tollgate::{LimiterConfig, RateLimiter, TokenBucket};
    /// let limiter = TokenBucket::in_memory(LimiterConfig::new(2, 1.0).unwrap());
    /// assert!(limiter.check("bob:127.0.0.1").is_admitted());
    /// assert!(limiter.check("bob:127.0.0.1").is_admitted());
    /// assert!(!limiter.check("bob:127.0.0.1").is_admitted());
    /// ```
    pub fn new(config: LimiterConfig, store: S) -> Self {
        Self { store: Arc::new(store), config, clock: Arc::new(MonotonicClock::default()) }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Limiter configuration.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current reading of the limiter's clock.
    pub fn now_nanos(&self) -> u64 {
        self.clock.now_nanos()
    }

    /// Drop buckets idle for at least `idle_for`, never less than the time an
    /// empty bucket needs to refill completely.
    ///
    /// Any bucket idle that long is already back at `capacity`, which is exactly
    /// what a newly created bucket holds, so eviction never changes a decision.
    pub fn evict_idle(&self, idle_for: Duration) -> usize {
        let idle_for = idle_for.max(self.config.time_to_full());
        self.store.evict_idle(self.now_nanos(), idle_for)
    }

    fn denied(&self, tokens: f64) -> Decision {
        let wait_secs = (1.0 - tokens) / self.config.refill_rate();
        Decision::Denied {
            // Half away from zero; the estimate is advisory. Both saturate for
            // rates too small to represent the wait.
            retry_after_secs: wait_secs.round() as u64,
            wait: Duration::try_from_secs_f64(wait_secs).unwrap_or(Duration::MAX),
        }
    }
}

impl<S> RateLimiter for TokenBucket<S>
where
    S: BucketStore + 'static,
{
    fn check_and_consume(&self, key: &str, now_nanos: u64) -> Decision {
        let capacity = f64::from(self.config.capacity());
        let handle = self.store.get_or_create(key, now_nanos, capacity);
        let mut bucket = lock_bucket(&handle);

        // A caller whose clock read predates the last commit refills nothing
        // and must not move the timestamp backward.
        let elapsed_secs =
            now_nanos.saturating_sub(bucket.last_refill_nanos) as f64 / NANOS_PER_SEC;
        bucket.tokens = (bucket.tokens + elapsed_secs * self.config.refill_rate()).min(capacity);
        bucket.last_refill_nanos = bucket.last_refill_nanos.max(now_nanos);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            let remaining = bucket.tokens as u32;
            drop(bucket);
            tracing::debug!(key, remaining, "admitted");
            Decision::Admitted { remaining }
        } else {
            let decision = self.denied(bucket.tokens);
            drop(bucket);
            tracing::debug!(key, retry_after_secs = decision.retry_after_secs(), "denied");
            decision
        }
    }

    fn check(&self, key: &str) -> Decision {
        self.check_and_consume(key, self.now_nanos())
    }
}
