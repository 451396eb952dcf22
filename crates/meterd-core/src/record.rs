//! Usage record types for meterd.
//!
//! A usage record is the auditable unit of metered work: one record per
//! validated request, created `Pending` and committed exactly once to a
//! terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ContextId, Credits, FeatureKey, PrincipalId, RecordId, ResultId};

/// The access decision made at validation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    /// The request may proceed and its reserved cost fits the quota.
    Granted,

    /// The request was refused (rate limit, quota, or policy).
    Denied,
}

impl AccessDecision {
    /// Get the decision as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }
}

/// Status of a usage record.
///
/// Lifecycle: `Pending` → `Success` | `Failed` (via commit, exactly once),
/// or `Pending` → `Expired` (via the stale-record sweep). Terminal statuses
/// are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Request in progress, awaiting commit.
    Pending,

    /// Request completed successfully; counts toward quota.
    Success,

    /// Request failed; does not count toward quota.
    Failed,

    /// Pending too long; expired by the sweeper.
    Expired,
}

impl RecordStatus {
    /// Whether the status is terminal (no further transitions allowed).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Get the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

/// Client-supplied usage estimation, folded into the request fingerprint.
///
/// When present, at least one field must be populated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageEstimate {
    /// Number of input characters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_chars: Option<u64>,

    /// Maximum output tokens expected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,

    /// Model identifier being used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Upper bound on `input_chars`.
pub const MAX_INPUT_CHARS: u64 = 10_000_000;

/// Upper bound on token counts (estimate and metrics).
pub const MAX_TOKENS: u64 = 2_000_000;

/// Upper bound on reported latency (one hour).
pub const MAX_LATENCY_MS: u64 = 3_600_000;

impl UsageEstimate {
    /// Whether no field is populated.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.input_chars.is_none() && self.max_output_tokens.is_none() && self.model.is_none()
    }

    /// Whether all populated fields are within their bounded ranges.
    #[must_use]
    pub fn in_bounds(&self) -> bool {
        self.input_chars.map_or(true, |v| v <= MAX_INPUT_CHARS)
            && self.max_output_tokens.map_or(true, |v| v <= MAX_TOKENS)
            && self.model.as_ref().map_or(true, |m| m.len() <= 100)
    }
}

/// Outcome metrics attached when committing a successful request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageMetrics {
    /// Model identifier actually used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,

    /// Actual input tokens consumed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,

    /// Actual output tokens generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,

    /// Request latency in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl UsageMetrics {
    /// Whether all populated fields are within their bounded ranges.
    #[must_use]
    pub fn in_bounds(&self) -> bool {
        self.model_used.as_ref().map_or(true, |m| m.len() <= 100)
            && self.input_tokens.map_or(true, |v| v <= MAX_TOKENS)
            && self.output_tokens.map_or(true, |v| v <= MAX_TOKENS)
            && self.latency_ms.map_or(true, |v| v <= MAX_LATENCY_MS)
    }
}

/// Failure classification attached when committing a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Server-side error (5xx).
    InternalError,

    /// Request timed out.
    Timeout,

    /// Upstream rate limit hit.
    RateLimited,

    /// Malformed response from upstream.
    InvalidResponse,

    /// Upstream service error.
    UpstreamError,

    /// Client-side error (4xx).
    ClientError,

    /// Request or response validation failed.
    ValidationError,
}

/// Failure detail: a category plus a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// Category of the failure.
    pub kind: FailureKind,

    /// Human-readable failure description.
    pub reason: String,
}

/// A usage record: one per validated request.
///
/// Once status leaves `Pending` the record is immutable. Only `status`,
/// `committed_at`, `final_cost`, `metrics`, and `failure` are ever written,
/// and only once, by the store's commit operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Unique record ID.
    pub id: RecordId,

    /// The principal that made the request.
    pub principal_id: PrincipalId,

    /// The billing context charged for the request.
    pub context_id: ContextId,

    /// Client-supplied globally unique request ID for idempotency.
    pub client_request_id: String,

    /// Fingerprint of endpoint + method + payload hash + estimate + feature.
    pub fingerprint: String,

    /// The access decision made at validation time.
    pub access: AccessDecision,

    /// The feature being used.
    pub feature_key: FeatureKey,

    /// The API endpoint path being called.
    pub endpoint: String,

    /// HTTP method (GET, POST, etc.).
    pub method: String,

    /// Optional client IP address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,

    /// Optional client user agent string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_user_agent: Option<String>,

    /// Client-supplied usage estimation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_estimate: Option<UsageEstimate>,

    /// Credits reserved at validation time.
    pub reserved_cost: Credits,

    /// Credits actually charged, set when the record commits as `Success`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_cost: Option<Credits>,

    /// Current status.
    pub status: RecordStatus,

    /// When the status left `Pending`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed_at: Option<DateTime<Utc>>,

    /// Outcome metrics, set on successful commit when supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<UsageMetrics>,

    /// Failure classification, set on failed commit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,

    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Whether the record is still awaiting its commit.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.status, RecordStatus::Pending)
    }
}

/// Parameters for creating a new pending usage record.
///
/// Groups the validation-time fields so `UsageRecord::pending` stays
/// readable at call sites.
#[derive(Debug, Clone)]
pub struct NewUsageRecord {
    /// The principal that made the request.
    pub principal_id: PrincipalId,

    /// The billing context charged for the request.
    pub context_id: ContextId,

    /// Client-supplied request ID.
    pub client_request_id: String,

    /// Computed request fingerprint.
    pub fingerprint: String,

    /// The access decision.
    pub access: AccessDecision,

    /// The feature being used.
    pub feature_key: FeatureKey,

    /// The API endpoint path.
    pub endpoint: String,

    /// HTTP method.
    pub method: String,

    /// Optional client IP address.
    pub client_ip: Option<String>,

    /// Optional client user agent.
    pub client_user_agent: Option<String>,

    /// Client-supplied usage estimation.
    pub usage_estimate: Option<UsageEstimate>,

    /// Credits reserved at validation time.
    pub reserved_cost: Credits,
}

impl UsageRecord {
    /// Create a new `Pending` record from validation-time fields.
    #[must_use]
    pub fn pending(new: NewUsageRecord) -> Self {
        Self {
            id: RecordId::generate(),
            principal_id: new.principal_id,
            context_id: new.context_id,
            client_request_id: new.client_request_id,
            fingerprint: new.fingerprint,
            access: new.access,
            feature_key: new.feature_key,
            endpoint: new.endpoint,
            method: new.method,
            client_ip: new.client_ip,
            client_user_agent: new.client_user_agent,
            usage_estimate: new.usage_estimate,
            reserved_cost: new.reserved_cost,
            final_cost: None,
            status: RecordStatus::Pending,
            committed_at: None,
            metrics: None,
            failure: None,
            created_at: Utc::now(),
        }
    }
}

/// The structured payload produced by a successful request.
///
/// Linked 1:1 to the usage record that produced it; only `Success` commits
/// carrying a payload create one. Independently addressable for later
/// retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Unique result ID (ULID for time-ordering).
    pub id: ResultId,

    /// The usage record that produced this result.
    pub record_id: RecordId,

    /// The principal that owns the result (denormalized for querying).
    pub principal_id: PrincipalId,

    /// The feature that produced the result (denormalized).
    pub feature_key: FeatureKey,

    /// The opaque structured payload.
    pub payload: serde_json::Value,

    /// When the result was stored.
    pub created_at: DateTime<Utc>,
}

impl ResultRecord {
    /// Create a new result record for a committed usage record.
    #[must_use]
    pub fn new(record: &UsageRecord, payload: serde_json::Value) -> Self {
        Self {
            id: ResultId::generate(),
            record_id: record.id,
            principal_id: record.principal_id,
            feature_key: record.feature_key.clone(),
            payload,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(access: AccessDecision) -> UsageRecord {
        UsageRecord::pending(NewUsageRecord {
            principal_id: PrincipalId::generate(),
            context_id: ContextId::generate(),
            client_request_id: "req_1".into(),
            fingerprint: "f".repeat(64),
            access,
            feature_key: FeatureKey::new("api.extract_keywords"),
            endpoint: "/v1/extract".into(),
            method: "POST".into(),
            client_ip: None,
            client_user_agent: None,
            usage_estimate: None,
            reserved_cost: Credits::from_hundredths(150),
        })
    }

    #[test]
    fn pending_record_defaults() {
        let record = new_record(AccessDecision::Granted);
        assert!(record.is_pending());
        assert!(record.final_cost.is_none());
        assert!(record.committed_at.is_none());
    }

    #[test]
    fn status_terminality() {
        assert!(!RecordStatus::Pending.is_terminal());
        assert!(RecordStatus::Success.is_terminal());
        assert!(RecordStatus::Failed.is_terminal());
        assert!(RecordStatus::Expired.is_terminal());
    }

    #[test]
    fn estimate_bounds() {
        let ok = UsageEstimate {
            input_chars: Some(22_000),
            max_output_tokens: Some(700),
            model: Some("gpt-4o-mini".into()),
        };
        assert!(ok.in_bounds());
        assert!(!ok.is_empty());

        let over = UsageEstimate {
            input_chars: Some(MAX_INPUT_CHARS + 1),
            ..UsageEstimate::default()
        };
        assert!(!over.in_bounds());

        assert!(UsageEstimate::default().is_empty());
    }

    #[test]
    fn record_serde_roundtrip() {
        let record = new_record(AccessDecision::Denied);
        let json = serde_json::to_string(&record).unwrap();
        let parsed: UsageRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, record.id);
        assert_eq!(parsed.access, AccessDecision::Denied);
        assert_eq!(parsed.status, RecordStatus::Pending);
    }

    #[test]
    fn result_record_links_to_usage_record() {
        let record = new_record(AccessDecision::Granted);
        let result = ResultRecord::new(&record, serde_json::json!({"score": 0.9}));
        assert_eq!(result.record_id, record.id);
        assert_eq!(result.principal_id, record.principal_id);
    }
}
