//! Rate limiting primitives.
//!
//! This module provides the building blocks for admission control:
//! - [`RateLimiter`]: The core trait for per-key admission decisions.
//! - [`TokenBucket`](strategies::TokenBucket): The token-bucket admission controller.
//! - [`BucketStore`](store::BucketStore): Per-key bucket state with per-bucket locking.
//! - [`AdmissionLayer`]: Tower middleware that enforces the limit.
//! - [`Decision`]: The result of a check (Admitted/Denied).
//!
//! # Architecture
//!
//! - **Middleware**: `AdmissionLayer` wraps your service. It derives a key from each
//!   request and asks a `RateLimiter`; it doesn't know *how* limiting works.
//! - **Logic**: `TokenBucket` refills lazily at check time and decides.
//! - **Storage**: `BucketStore` owns every bucket. Each bucket has its own lock, so
//!   unrelated keys never contend.

use std::time::Duration;

pub mod middleware;
pub mod store;
pub mod strategies;
pub mod sweeper;
pub use middleware::{AdmissionLayer, AdmissionService};

/// The decision returned by a rate limiter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// The request may proceed; one token was consumed.
    Admitted {
        /// Whole tokens remaining after this admission.
        /// Useful for `X-RateLimit-Remaining` headers.
        remaining: u32,
    },
    /// The request is denied; nothing was consumed.
    Denied {
        /// Time until one full token is available, rounded to whole seconds
        /// (half away from zero). Useful for `Retry-After` headers.
        retry_after_secs: u64,
        /// Exact time until one full token is available.
        wait: Duration,
    },
}

impl Decision {
    /// Helper to check if admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted { .. })
    }

    /// Retry guidance in whole seconds; `0` when admitted.
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            Decision::Admitted { .. } => 0,
            Decision::Denied { retry_after_secs, .. } => *retry_after_secs,
        }
    }
}

/// Core interface for per-key admission control.
///
/// Checks are synchronous, bounded arithmetic over in-memory state and always
/// produce a decision.
pub trait RateLimiter: Send + Sync {
    /// Refill `key`'s bucket up to `now_nanos` and try to consume one token.
    ///
    /// `now_nanos` must come from the same clock as every other timestamp
    /// passed for this limiter.
    fn check_and_consume(&self, key: &str, now_nanos: u64) -> Decision;

    /// [`check_and_consume`](Self::check_and_consume) at the limiter's current time.
    fn check(&self, key: &str) -> Decision;
}

impl<L: RateLimiter + ?Sized> RateLimiter for std::sync::Arc<L> {
    fn check_and_consume(&self, key: &str, now_nanos: u64) -> Decision {
        (**self).check_and_consume(key, now_nanos)
    }

    fn check(&self, key: &str) -> Decision {
        (**self).check(key)
    }
}
