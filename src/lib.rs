#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # tollgate
//!
//! Request-admission gate built on a per-key token bucket.
//!
//! Each key (for example `"<userId>:<ip>"`) owns a bucket of up to `capacity`
//! tokens that refills continuously at `refill_rate` tokens per second. Every
//! admitted request spends one token; a request finding less than one token is
//! denied with whole-second retry guidance.
//!
//! ## Features
//!
//! - **Lazy refill**: no timers; state is brought up to date at check time
//! - **Per-bucket locking**: unrelated keys never contend
//! - **Monotonic time**: immune to wall-clock jumps
//! - **Opt-in idle eviction** that never changes a decision
//! - **Tower middleware** and a framework-neutral validate gate
//!
//! ## Quick Start
//!
//! ```rust
//! use tollgate::{LimiterConfig, RateLimiter, TokenBucket};
//!
//! let limiter = TokenBucket::in_memory(LimiterConfig::new(9, 41.0 / 60.0).unwrap());
//! for _ in 0..9 {
//!     assert!(limiter.check("alice:10.0.0.1").is_admitted());
//! }
//! let denied = limiter.check("alice:10.0.0.1");
//! assert!(!denied.is_admitted());
//! assert!(denied.retry_after_secs() > 0);
//! ```

pub mod clock;
pub mod config;
pub mod error;
#[cfg(feature = "serde")]
pub mod gate;
pub mod rate_limit;

// Re-exports
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ConfigError, LimiterConfig};
pub use error::GateError;
#[cfg(feature = "serde")]
pub use gate::{Gate, GateBody, GateReply, GateVerdict, ValidateRequest};
pub use rate_limit::store::{BucketState, BucketStore, InMemoryBucketStore};
pub use rate_limit::strategies::TokenBucket;
pub use rate_limit::sweeper::{spawn_idle_sweeper, SweeperHandle, MIN_SWEEP_PERIOD};
pub use rate_limit::{AdmissionLayer, AdmissionService, Decision, RateLimiter};
