//! Limiter configuration.
//!
//! Two constants fully determine limiter behavior: the effective rate is
//! `refill_rate` tokens per second, with bursts of up to `capacity` requests.
//! Both are fixed at startup; an invalid pair is rejected before any traffic
//! is admitted.

use std::time::Duration;

/// Environment variable holding the burst capacity.
pub const ENV_CAPACITY: &str = "TOLLGATE_CAPACITY";
/// Environment variable holding the refill rate in tokens per second.
pub const ENV_REFILL_RATE: &str = "TOLLGATE_REFILL_RATE";

/// Default burst capacity.
pub const DEFAULT_CAPACITY: u32 = 9;
/// Default refill rate: 41 tokens per minute.
pub const DEFAULT_REFILL_RATE: f64 = 41.0 / 60.0;

/// Errors produced when validating limiter configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Capacity must be > 0.
    #[error("capacity must be > 0 (got {provided})")]
    InvalidCapacity {
        /// Value provided by caller.
        provided: u32,
    },
    /// Refill rate must be finite and > 0.
    #[error("refill_rate must be a finite number > 0 (got {provided})")]
    InvalidRefillRate {
        /// Value provided by caller.
        provided: f64,
    },
    /// An environment variable could not be parsed.
    #[error("{var} has invalid value {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Raw value found in the environment.
        value: String,
    },
}

/// Validated token-bucket configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawLimiterConfig"))]
pub struct LimiterConfig {
    capacity: u32,
    refill_rate: f64,
}

impl LimiterConfig {
    /// Create a config with validation.
    ///
    /// # Examples
    /// ```
    /// use tollgate::LimiterConfig;
    /// let cfg = LimiterConfig::new(10, 2.5).unwrap();
    /// assert_eq!(cfg.capacity(), 10);
    /// assert!(LimiterConfig::new(0, 1.0).is_err());
    /// ```
    pub fn new(capacity: u32, refill_rate: f64) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity { provided: capacity });
        }
        if !refill_rate.is_finite() || refill_rate <= 0.0 {
            return Err(ConfigError::InvalidRefillRate { provided: refill_rate });
        }
        Ok(Self { capacity, refill_rate })
    }

    /// Read `TOLLGATE_CAPACITY` and `TOLLGATE_REFILL_RATE`, falling back to the
    /// defaults for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let capacity = match lookup(ENV_CAPACITY) {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidEnv { var: ENV_CAPACITY, value: raw })?,
            None => DEFAULT_CAPACITY,
        };
        let refill_rate = match lookup(ENV_REFILL_RATE) {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .map_err(|_| ConfigError::InvalidEnv { var: ENV_REFILL_RATE, value: raw })?,
            None => DEFAULT_REFILL_RATE,
        };
        Self::new(capacity, refill_rate)
    }

    /// Maximum burst size.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Time for an empty bucket to refill to `capacity`.
    pub fn time_to_full(&self) -> Duration {
        Duration::try_from_secs_f64(f64::from(self.capacity) / self.refill_rate)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self { capacity: DEFAULT_CAPACITY, refill_rate: DEFAULT_REFILL_RATE }
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawLimiterConfig {
    capacity: u32,
    refill_rate: f64,
}

#[cfg(feature = "serde")]
impl TryFrom<RawLimiterConfig> for LimiterConfig {
    type Error = ConfigError;

    fn try_from(raw: RawLimiterConfig) -> Result<Self, Self::Error> {
        Self::new(raw.capacity, raw.refill_rate)
    }
}
