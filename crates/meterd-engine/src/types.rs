//! Request and response types for the metering engine.
//!
//! `CommitRequest` doubles as the asynchronous queue payload: the
//! synchronous call and the `usage_commits` message share one shape.

use serde::{Deserialize, Serialize};

use meterd_core::{
    AccessDecision, ContextId, Credits, FailureDetail, FeatureKey, PlanId, PrincipalId, RecordId,
    UsageEstimate, UsageMetrics,
};

use crate::rate_limit::RateLimitSnapshot;

/// HTTP-equivalent status for callers that map outcomes onto a transport.
///
/// The engine itself never speaks HTTP; this is the status mapping named by
/// the external interface contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusHint {
    /// Request handled; decision carried in the outcome body.
    Ok,

    /// Malformed client input.
    BadRequest,

    /// No active billing context for the principal.
    PaymentRequired,

    /// Rate limit or quota exceeded.
    TooManyRequests,

    /// Service-side configuration or infrastructure error.
    Internal,
}

impl StatusHint {
    /// The equivalent HTTP status code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::PaymentRequired => 402,
            Self::TooManyRequests => 429,
            Self::Internal => 500,
        }
    }
}

/// Input to [`crate::MeteringEngine::validate`].
#[derive(Debug, Clone, Deserialize)]
pub struct ValidateRequest {
    /// The billable principal making the request.
    pub principal_id: PrincipalId,

    /// The principal's subscription plan (resolved by the caller's auth
    /// layer).
    pub plan_id: PlanId,

    /// The billing context the record should reference. Quota state is
    /// still read from the principal's active context.
    pub context_id: ContextId,

    /// Globally unique request ID for idempotency.
    pub client_request_id: String,

    /// The feature being used.
    pub feature_key: FeatureKey,

    /// The API endpoint path being called.
    pub endpoint: String,

    /// HTTP method (GET, POST, etc.).
    pub method: String,

    /// SHA-256 hash of the request payload, supplied by the caller.
    pub payload_hash: String,

    /// Optional client IP address.
    #[serde(default)]
    pub client_ip: Option<String>,

    /// Optional client user agent string.
    #[serde(default)]
    pub client_user_agent: Option<String>,

    /// Optional usage estimation; folded into the fingerprint.
    #[serde(default)]
    pub usage_estimate: Option<UsageEstimate>,
}

impl ValidateRequest {
    /// Boundary validation for client input.
    ///
    /// # Errors
    ///
    /// Returns a human-readable description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.client_request_id.trim().is_empty() {
            return Err("client_request_id must not be empty".into());
        }
        if self.endpoint.trim().is_empty() {
            return Err("endpoint must not be empty".into());
        }
        if self.method.trim().is_empty() {
            return Err("method must not be empty".into());
        }
        if self.payload_hash.len() != 64
            || !self.payload_hash.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err("payload_hash must be a 64-character hex digest".into());
        }
        if let Some(estimate) = &self.usage_estimate {
            if estimate.is_empty() {
                return Err(
                    "usage_estimate must have at least one populated field when present".into(),
                );
            }
            if !estimate.in_bounds() {
                return Err("usage_estimate field out of bounded range".into());
            }
        }
        Ok(())
    }
}

/// Outcome of a validation call.
#[derive(Debug, Clone, Serialize)]
pub struct ValidateOutcome {
    /// The access decision.
    pub access: AccessDecision,

    /// The usage record created or replayed, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<RecordId>,

    /// Human-readable status message with concrete numbers.
    pub message: String,

    /// Credits reserved for this request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserved_cost: Option<Credits>,

    /// HTTP-equivalent status for the caller's response mapping.
    pub status: StatusHint,

    /// Rate-limit state for response headers, when the check ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSnapshot>,
}

/// Input to [`crate::MeteringEngine::commit`], synchronous or via queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    /// The principal that made the original request.
    pub principal_id: PrincipalId,

    /// The usage record to commit.
    pub record_id: RecordId,

    /// `true` if the metered request succeeded.
    pub succeeded: bool,

    /// Override for the charged cost; defaults to the reserved estimate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_cost: Option<Credits>,

    /// Outcome metrics for successful requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<UsageMetrics>,

    /// Failure detail; **required** when `succeeded` is `false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,

    /// Opaque result payload; only meaningful when `succeeded` is `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_payload: Option<serde_json::Value>,
}

impl CommitRequest {
    /// Boundary validation for client input.
    ///
    /// # Errors
    ///
    /// Returns a human-readable description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if !self.succeeded {
            match &self.failure {
                None => return Err("failure details are required when succeeded=false".into()),
                Some(failure) => {
                    if failure.reason.trim().is_empty() || failure.reason.len() > 1000 {
                        return Err("failure.reason must be 1-1000 characters".into());
                    }
                }
            }
        }
        if let Some(metrics) = &self.metrics {
            if !metrics.in_bounds() {
                return Err("metrics field out of bounded range".into());
            }
        }
        Ok(())
    }
}

/// Outcome of a commit call.
///
/// `ok` is `true` for every expected path, including replays and missing
/// records. The exception is an ownership mismatch, which is a caller bug.
#[derive(Debug, Clone, Serialize)]
pub struct CommitOutcome {
    /// Whether the commit was accepted (or idempotently absorbed).
    pub ok: bool,

    /// Human-readable status message.
    pub message: String,
}
