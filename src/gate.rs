//! Validate-endpoint semantics, independent of any HTTP framework.
//!
//! A [`Gate`] takes a parsed [`ValidateRequest`] plus the caller's network
//! origin and produces a [`GateReply`]: a status code, a JSON body and an
//! optional `Retry-After` value. The request input is passed through verbatim.

use crate::rate_limit::{Decision, RateLimiter};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// The only category this gate serves.
pub const RATE_LIMITING_CATEGORY: &str = "Rate Limiting";

/// Incoming request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    /// Caller-supplied identifier, trusted as given.
    pub user_id: String,
    /// Payload, echoed back on admission.
    pub input: String,
    /// Must equal [`RATE_LIMITING_CATEGORY`].
    pub category: String,
}

/// Verdict body returned for admitted, denied, and failed requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateVerdict {
    /// `true` when the request was not let through.
    pub blocked: bool,
    /// Short human-readable cause.
    pub reason: String,
    /// The input echoed back; present only on admission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanitized_output: Option<String>,
    /// Fixed confidence attached to each verdict kind.
    pub confidence: f64,
}

/// Response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GateBody {
    /// Structured verdict.
    Verdict(GateVerdict),
    /// Plain rejection detail, used for unsupported categories.
    Detail {
        /// Human-readable reason.
        detail: String,
    },
}

/// Transport-neutral reply.
#[derive(Debug, Clone, PartialEq)]
pub struct GateReply {
    /// HTTP status code.
    pub status: u16,
    /// JSON body.
    pub body: GateBody,
    /// Seconds for a `Retry-After` header, set only on denial.
    pub retry_after_secs: Option<u64>,
}

impl GateReply {
    fn verdict(status: u16, verdict: GateVerdict) -> Self {
        Self { status, body: GateBody::Verdict(verdict), retry_after_secs: None }
    }

    /// 400 for a body that failed to parse or match the schema.
    pub fn invalid_request() -> Self {
        Self::verdict(
            400,
            GateVerdict {
                blocked: true,
                reason: "Invalid request format".into(),
                sanitized_output: None,
                confidence: 0.99,
            },
        )
    }

    /// 500 for an unexpected fault outside the limiter.
    pub fn internal_error() -> Self {
        Self::verdict(
            500,
            GateVerdict {
                blocked: true,
                reason: "Internal server error".into(),
                sanitized_output: None,
                confidence: 0.50,
            },
        )
    }

    fn invalid_category() -> Self {
        Self {
            status: 400,
            body: GateBody::Detail { detail: "Invalid category".into() },
            retry_after_secs: None,
        }
    }

    fn rate_limited(retry_after_secs: u64) -> Self {
        Self {
            retry_after_secs: Some(retry_after_secs),
            ..Self::verdict(
                429,
                GateVerdict {
                    blocked: true,
                    reason: "Rate limit exceeded".into(),
                    sanitized_output: None,
                    confidence: 0.99,
                },
            )
        }
    }

    fn passed(input: String) -> Self {
        Self::verdict(
            200,
            GateVerdict {
                blocked: false,
                reason: "Input passed all security checks".into(),
                sanitized_output: Some(input),
                confidence: 0.95,
            },
        )
    }
}

/// Bucket key for a caller: `"<user_id>:<ip>"`.
pub fn bucket_key(user_id: &str, origin: IpAddr) -> String {
    format!("{user_id}:{origin}")
}

/// Admission gate over a shared limiter.
#[derive(Debug, Clone)]
pub struct Gate<L> {
    limiter: L,
}

impl<L: RateLimiter> Gate<L> {
    /// Wrap `limiter`.
    pub fn new(limiter: L) -> Self {
        Self { limiter }
    }

    /// The underlying limiter.
    pub fn limiter(&self) -> &L {
        &self.limiter
    }

    /// Check the category, then spend one token from the caller's bucket.
    ///
    /// Requests with the wrong category are rejected before the limiter is
    /// consulted, so they never consume a token.
    pub fn handle(&self, request: ValidateRequest, origin: IpAddr) -> GateReply {
        if request.category != RATE_LIMITING_CATEGORY {
            tracing::debug!(category = %request.category, "rejected category");
            return GateReply::invalid_category();
        }

        let key = bucket_key(&request.user_id, origin);
        match self.limiter.check(&key) {
            Decision::Admitted { remaining } => {
                tracing::info!(key = %key, remaining, "request allowed");
                GateReply::passed(request.input)
            }
            Decision::Denied { retry_after_secs, .. } => {
                tracing::warn!(key = %key, retry_after_secs, "rate limit exceeded");
                GateReply::rate_limited(retry_after_secs)
            }
        }
    }
}
