//! Error types surfaced by the admission middleware.
use std::fmt;
use std::time::Duration;

/// Error returned by services wrapped in an admission layer.
#[derive(Debug, Clone)]
pub enum GateError<E> {
    /// The caller's bucket had less than one token.
    RateLimited {
        /// Retry guidance rounded to whole seconds (e.g. for `Retry-After`).
        retry_after_secs: u64,
        /// Exact time until one full token is available.
        wait: Duration,
    },
    /// The wrapped service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for GateError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited { retry_after_secs, .. } => {
                write!(f, "rate limit exceeded; retry after {}s", retry_after_secs)
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for GateError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RateLimited { .. } => None,
        }
    }
}

impl<E> GateError<E> {
    /// Check if this error is a rate-limit denial.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Whole-second retry guidance if this is a denial.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs, .. } => Some(*retry_after_secs),
            Self::Inner(_) => None,
        }
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RateLimited { .. } => None,
        }
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RateLimited { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn rate_limited_display_includes_retry() {
        let err: GateError<io::Error> =
            GateError::RateLimited { retry_after_secs: 2, wait: Duration::from_millis(1460) };
        let msg = format!("{}", err);
        assert!(msg.contains("rate limit"));
        assert!(msg.contains("2s"));
        assert!(err.source().is_none());
        assert_eq!(err.retry_after_secs(), Some(2));
    }

    #[test]
    fn inner_is_transparent() {
        let err = GateError::Inner(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(!err.is_rate_limited());
        assert_eq!(err.to_string(), "boom");
        assert!(err.source().is_some());
        assert_eq!(err.retry_after_secs(), None);
        assert_eq!(err.into_inner().unwrap().to_string(), "boom");
    }
}
