//! The usage metering engine.
//!
//! Orchestrates the validate→log→commit lifecycle: fingerprinting,
//! idempotency lookup, rate limiting, quota checking, record creation, and
//! the commit that finalizes cost and side effects.

use std::sync::Arc;

use meterd_core::{
    request_fingerprint, AccessDecision, NewUsageRecord, PricingLookup, ResultRecord, UsageRecord,
};
use meterd_store::{CommitApplied, CommitUpdate, Store, StoreError};

use crate::error::{EngineError, Result};
use crate::rate_limit::{RateLimitSnapshot, RateLimiter};
use crate::types::{CommitOutcome, CommitRequest, StatusHint, ValidateOutcome, ValidateRequest};

/// The metering engine.
///
/// Explicitly constructed with its collaborators (storage, pricing, and
/// the rate limiter) and shared by reference across request-scoped tasks.
pub struct MeteringEngine {
    store: Arc<dyn Store>,
    pricing: Arc<dyn PricingLookup>,
    limiter: RateLimiter,
}

impl MeteringEngine {
    /// Create an engine over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        pricing: Arc<dyn PricingLookup>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            store,
            pricing,
            limiter,
        }
    }

    /// Validate a request against rate limits and quota, and log it.
    ///
    /// Policy denials are normal return values; only malformed input and
    /// storage failures surface as errors.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRequest`] for input failing boundary
    /// validation, or [`EngineError::Store`] on persistence failure.
    pub async fn validate(&self, request: ValidateRequest) -> Result<ValidateOutcome> {
        request.validate().map_err(EngineError::InvalidRequest)?;

        let fingerprint = request_fingerprint(
            &request.endpoint,
            &request.method,
            &request.payload_hash,
            request.usage_estimate.as_ref(),
            &request.feature_key,
        );

        // Idempotent replay: return the stored decision verbatim without
        // consuming another rate-limit slot or re-checking quota.
        if let Some(existing) = self.store.find_record_by_idempotency_key(
            &request.principal_id,
            &request.client_request_id,
            &fingerprint,
        )? {
            tracing::info!(
                principal_id = %request.principal_id,
                client_request_id = %request.client_request_id,
                record_id = %existing.id,
                access = existing.access.as_str(),
                "Idempotent request; returning existing record"
            );
            return Ok(Self::replay_outcome(&existing));
        }

        let rate_limit = self.limiter.check_and_increment(&request.principal_id).await;
        if let Some(snapshot) = rate_limit {
            if snapshot.is_exceeded() {
                return Ok(Self::rate_limited_outcome(&request, snapshot));
            }
        }

        let Some(reserved_cost) = self
            .pricing
            .feature_cost(&request.feature_key, &request.plan_id)
        else {
            tracing::error!(
                feature_key = %request.feature_key,
                plan_id = %request.plan_id,
                "Feature pricing not configured"
            );
            return Ok(ValidateOutcome {
                access: AccessDecision::Denied,
                record_id: None,
                message: "Service pricing not configured. Please contact support.".into(),
                reserved_cost: None,
                status: StatusHint::Internal,
                rate_limit,
            });
        };

        let Some(context) = self.store.get_context(&request.principal_id)? else {
            tracing::warn!(
                principal_id = %request.principal_id,
                "Validation without an active billing context"
            );
            return Ok(ValidateOutcome {
                access: AccessDecision::Denied,
                record_id: None,
                message: "No active billing context. A subscription is required before usage can be metered.".into(),
                reserved_cost: None,
                status: StatusHint::PaymentRequired,
                rate_limit,
            });
        };

        let (access, message, status) = if context.would_exceed(reserved_cost) {
            (
                AccessDecision::Denied,
                format!(
                    "Quota exceeded. Used {}/{} credits. This request requires {} credits.",
                    context.credits_used, context.credits_allocation, reserved_cost
                ),
                StatusHint::TooManyRequests,
            )
        } else {
            let remaining_after = context.remaining().saturating_sub(reserved_cost);
            (
                AccessDecision::Granted,
                format!("Access granted. {remaining_after} credits remaining after this request."),
                StatusHint::Ok,
            )
        };

        // Denied-by-quota outcomes are persisted too, so replays work and
        // the denial is auditable; only Success commits consume quota.
        let record = UsageRecord::pending(NewUsageRecord {
            principal_id: request.principal_id,
            context_id: request.context_id,
            client_request_id: request.client_request_id.clone(),
            fingerprint: fingerprint.clone(),
            access,
            feature_key: request.feature_key.clone(),
            endpoint: request.endpoint.clone(),
            method: request.method.clone(),
            client_ip: request.client_ip.clone(),
            client_user_agent: request.client_user_agent.clone(),
            usage_estimate: request.usage_estimate.clone(),
            reserved_cost,
        });

        match self.store.insert_record(&record) {
            Ok(()) => {}
            Err(StoreError::DuplicateRecord { .. }) => {
                // A concurrent duplicate won the insert race; fall back to
                // the winner's record as if this were a replay.
                let Some(existing) = self.store.find_record_by_idempotency_key(
                    &request.principal_id,
                    &request.client_request_id,
                    &fingerprint,
                )?
                else {
                    return Err(StoreError::Database(
                        "idempotency index pointed at a missing record".into(),
                    )
                    .into());
                };
                return Ok(Self::replay_outcome(&existing));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            principal_id = %request.principal_id,
            record_id = %record.id,
            client_request_id = %request.client_request_id,
            access = access.as_str(),
            endpoint = %request.endpoint,
            method = %request.method,
            reserved_cost = %reserved_cost,
            "Usage logged (PENDING)"
        );

        Ok(ValidateOutcome {
            access,
            record_id: Some(record.id),
            message,
            reserved_cost: Some(reserved_cost),
            status,
            rate_limit,
        })
    }

    /// Commit a pending usage record (idempotent).
    ///
    /// Marks the record `Success` (counts toward quota) or `Failed` (does
    /// not), exactly once. Replays, missing records, and lost commit races
    /// all return `ok = true`; only an ownership mismatch returns
    /// `ok = false`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRequest`] for input failing boundary
    /// validation, or [`EngineError::Store`] on persistence failure.
    pub async fn commit(&self, request: CommitRequest) -> Result<CommitOutcome> {
        request.validate().map_err(EngineError::InvalidRequest)?;

        let Some(record) = self.store.get_record(&request.record_id)? else {
            return Ok(CommitOutcome {
                ok: true,
                message: "Usage record not found, but operation is idempotent.".into(),
            });
        };

        if record.principal_id != request.principal_id {
            tracing::warn!(
                record_id = %request.record_id,
                record_principal = %record.principal_id,
                caller_principal = %request.principal_id,
                "Usage commit ownership mismatch"
            );
            return Ok(CommitOutcome {
                ok: false,
                message: "Principal does not own this usage record.".into(),
            });
        }

        if !record.is_pending() {
            return Ok(CommitOutcome {
                ok: true,
                message: format!(
                    "Usage record already {}; operation is idempotent.",
                    record.status.as_str()
                ),
            });
        }

        let update = CommitUpdate {
            succeeded: request.succeeded,
            final_cost: if request.succeeded {
                request.final_cost
            } else {
                None
            },
            metrics: if request.succeeded {
                request.metrics.clone()
            } else {
                None
            },
            failure: if request.succeeded {
                None
            } else {
                request.failure.clone()
            },
        };

        let applied = match self.store.commit_record(&request.record_id, &update) {
            Ok(applied) => applied,
            // Deleted between lookup and commit: indistinguishable from an
            // already-processed commit, so it must not be retried.
            Err(StoreError::NotFound) => {
                return Ok(CommitOutcome {
                    ok: true,
                    message: "Usage record not found, but operation is idempotent.".into(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        match applied {
            CommitApplied::Applied(record) => {
                if request.succeeded {
                    if let Some(payload) = request.result_payload {
                        self.store.put_result(&ResultRecord::new(&record, payload))?;
                    }
                }

                let status_str = if request.succeeded { "SUCCESS" } else { "FAILED" };
                tracing::info!(
                    record_id = %record.id,
                    principal_id = %record.principal_id,
                    status = status_str,
                    final_cost = ?record.final_cost,
                    "Usage committed"
                );
                Ok(CommitOutcome {
                    ok: true,
                    message: format!("Usage committed as {status_str}."),
                })
            }
            CommitApplied::AlreadyTerminal(record) => Ok(CommitOutcome {
                ok: true,
                message: format!(
                    "Usage record already {}; operation is idempotent.",
                    record.status.as_str()
                ),
            }),
        }
    }

    fn replay_outcome(existing: &UsageRecord) -> ValidateOutcome {
        ValidateOutcome {
            access: existing.access,
            record_id: Some(existing.id),
            message: format!(
                "Request already processed (idempotent). Access: {}",
                existing.access.as_str()
            ),
            reserved_cost: Some(existing.reserved_cost),
            status: StatusHint::Ok,
            rate_limit: None,
        }
    }

    fn rate_limited_outcome(
        request: &ValidateRequest,
        snapshot: RateLimitSnapshot,
    ) -> ValidateOutcome {
        let window = snapshot
            .exceeded_window
            .map_or("minute", crate::rate_limit::Window::label);
        let limit = snapshot.exceeded_status().map_or(0, |status| status.limit);
        let retry_after = snapshot
            .retry_after_secs(chrono::Utc::now().timestamp())
            .unwrap_or(0);

        tracing::warn!(
            principal_id = %request.principal_id,
            window,
            limit,
            "Rate limit exceeded"
        );

        ValidateOutcome {
            access: AccessDecision::Denied,
            record_id: None,
            message: format!(
                "Rate limit exceeded. Limit: {limit} requests/{window}. Try again in {retry_after} seconds."
            ),
            reserved_cost: None,
            status: StatusHint::TooManyRequests,
            rate_limit: Some(snapshot),
        }
    }
}
