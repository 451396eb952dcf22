//! Metering engine integration tests.
//!
//! Exercises the validate→log→commit lifecycle end to end over the
//! in-memory store and counter backends.

use std::sync::Arc;

use chrono::Utc;

use meterd_core::{
    AccessDecision, BillingContext, ContextId, Credits, FailureDetail, FailureKind, FeatureKey,
    PlanId, PrincipalId, RecordStatus, UsageMetrics,
};
use meterd_engine::{
    CommitRequest, EngineError, MemoryCounterStore, MeteringEngine, RateLimitConfig, RateLimiter,
    StatusHint, ValidateRequest,
};
use meterd_store::{MemoryStore, Store};

const FEATURE: &str = "api.extract_keywords";

struct Harness {
    engine: MeteringEngine,
    store: Arc<MemoryStore>,
    principal: PrincipalId,
    plan: PlanId,
    context_id: ContextId,
}

fn harness_with(
    allocation: Credits,
    used: Credits,
    feature_cost: Credits,
    rate: RateLimitConfig,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let plan = PlanId::generate();
    let principal = PrincipalId::generate();

    let mut context = BillingContext::new(
        principal,
        plan,
        allocation,
        Utc::now(),
        Utc::now() + chrono::Duration::days(30),
    );
    context.credits_used = used;
    store.put_context(&context).unwrap();

    let pricing = meterd_core::PricingTable::new().with_feature(FEATURE, feature_cost);
    let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), rate);

    Harness {
        engine: MeteringEngine::new(store.clone(), Arc::new(pricing), limiter),
        store,
        principal,
        plan,
        context_id: context.id,
    }
}

fn harness() -> Harness {
    harness_with(
        Credits::from_whole(100),
        Credits::ZERO,
        Credits::from_hundredths(150),
        RateLimitConfig::default(),
    )
}

fn validate_request(harness: &Harness, request_id: &str) -> ValidateRequest {
    ValidateRequest {
        principal_id: harness.principal,
        plan_id: harness.plan,
        context_id: harness.context_id,
        client_request_id: request_id.to_string(),
        feature_key: FeatureKey::new(FEATURE),
        endpoint: "/v1/extract".into(),
        method: "POST".into(),
        payload_hash: "a1b2".repeat(16),
        client_ip: None,
        client_user_agent: None,
        usage_estimate: None,
    }
}

fn commit_success(harness: &Harness, record_id: meterd_core::RecordId) -> CommitRequest {
    CommitRequest {
        principal_id: harness.principal,
        record_id,
        succeeded: true,
        final_cost: None,
        metrics: None,
        failure: None,
        result_payload: None,
    }
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn granted_reports_remaining_credits() {
    let harness = harness();

    let outcome = harness
        .engine
        .validate(validate_request(&harness, "req_1"))
        .await
        .unwrap();

    assert_eq!(outcome.access, AccessDecision::Granted);
    assert_eq!(outcome.status, StatusHint::Ok);
    assert!(outcome.record_id.is_some());
    assert_eq!(outcome.reserved_cost, Some(Credits::from_hundredths(150)));
    assert!(
        outcome.message.contains("98.50 credits remaining"),
        "unexpected message: {}",
        outcome.message
    );
}

#[tokio::test]
async fn exhausted_quota_is_denied_with_numbers() {
    let harness = harness_with(
        Credits::from_whole(100),
        Credits::from_whole(100),
        Credits::from_hundredths(150),
        RateLimitConfig::default(),
    );

    let outcome = harness
        .engine
        .validate(validate_request(&harness, "req_1"))
        .await
        .unwrap();

    assert_eq!(outcome.access, AccessDecision::Denied);
    assert_eq!(outcome.status, StatusHint::TooManyRequests);
    assert!(outcome.message.contains("100.00/100.00"));
    assert!(outcome.message.contains("1.50"));
    // Quota denials are persisted so replays work and the denial audits.
    assert!(outcome.record_id.is_some());
}

#[tokio::test]
async fn quota_denial_replays_idempotently() {
    let harness = harness_with(
        Credits::from_whole(100),
        Credits::from_whole(100),
        Credits::from_hundredths(150),
        RateLimitConfig::default(),
    );

    let first = harness
        .engine
        .validate(validate_request(&harness, "req_1"))
        .await
        .unwrap();
    let second = harness
        .engine
        .validate(validate_request(&harness, "req_1"))
        .await
        .unwrap();

    assert_eq!(second.record_id, first.record_id);
    assert_eq!(second.access, AccessDecision::Denied);
    assert!(second.message.contains("idempotent"));
}

#[tokio::test]
async fn repeated_validate_returns_same_record() {
    let harness = harness();

    let first = harness
        .engine
        .validate(validate_request(&harness, "req_1"))
        .await
        .unwrap();
    let second = harness
        .engine
        .validate(validate_request(&harness, "req_1"))
        .await
        .unwrap();

    assert_eq!(second.record_id, first.record_id);
    assert_eq!(second.reserved_cost, first.reserved_cost);
    assert!(second.message.contains("idempotent"));
    assert_eq!(second.status, StatusHint::Ok);
}

#[tokio::test]
async fn different_fingerprint_creates_new_record() {
    let harness = harness();

    let first = harness
        .engine
        .validate(validate_request(&harness, "req_1"))
        .await
        .unwrap();

    let mut changed = validate_request(&harness, "req_1");
    changed.payload_hash = "c3d4".repeat(16);
    let second = harness.engine.validate(changed).await.unwrap();

    assert_ne!(second.record_id, first.record_id);
    assert!(!second.message.contains("idempotent"));
}

#[tokio::test]
async fn principals_are_isolated() {
    let harness = harness();

    let other = PrincipalId::generate();
    let context = BillingContext::new(
        other,
        harness.plan,
        Credits::from_whole(100),
        Utc::now(),
        Utc::now() + chrono::Duration::days(30),
    );
    harness.store.put_context(&context).unwrap();

    // Identical request id and payload under two principals.
    let outcome_a = harness
        .engine
        .validate(validate_request(&harness, "req_shared"))
        .await
        .unwrap();

    let mut request = validate_request(&harness, "req_shared");
    request.principal_id = other;
    let outcome_b = harness.engine.validate(request).await.unwrap();

    assert_ne!(outcome_a.record_id, outcome_b.record_id);
    assert_eq!(outcome_b.access, AccessDecision::Granted);
    assert!(!outcome_b.message.contains("idempotent"));
}

#[tokio::test]
async fn missing_billing_context_is_payment_required() {
    let harness = harness();
    let mut request = validate_request(&harness, "req_1");
    request.principal_id = PrincipalId::generate();

    let outcome = harness.engine.validate(request).await.unwrap();

    assert_eq!(outcome.access, AccessDecision::Denied);
    assert_eq!(outcome.status, StatusHint::PaymentRequired);
    assert!(outcome.record_id.is_none());
}

#[tokio::test]
async fn unpriced_feature_is_denied_internal() {
    let harness = harness();
    let mut request = validate_request(&harness, "req_1");
    request.feature_key = FeatureKey::new("api.unpriced");

    let outcome = harness.engine.validate(request).await.unwrap();

    assert_eq!(outcome.access, AccessDecision::Denied);
    assert_eq!(outcome.status, StatusHint::Internal);
    assert!(outcome.record_id.is_none());
}

#[tokio::test]
async fn malformed_payload_hash_is_invalid_request() {
    let harness = harness();
    let mut request = validate_request(&harness, "req_1");
    request.payload_hash = "short".into();

    let err = harness.engine.validate(request).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
}

// ============================================================================
// Rate limiting
// ============================================================================

#[tokio::test]
async fn rate_limit_boundary_denies_crossing_request() {
    let harness = harness_with(
        Credits::from_whole(100),
        Credits::ZERO,
        Credits::from_hundredths(150),
        RateLimitConfig {
            per_minute: Some(2),
            per_day: None,
        },
    );

    for i in 1..=2 {
        let outcome = harness
            .engine
            .validate(validate_request(&harness, &format!("req_{i}")))
            .await
            .unwrap();
        assert_eq!(outcome.access, AccessDecision::Granted, "request {i}");
    }

    let outcome = harness
        .engine
        .validate(validate_request(&harness, "req_3"))
        .await
        .unwrap();

    assert_eq!(outcome.access, AccessDecision::Denied);
    assert_eq!(outcome.status, StatusHint::TooManyRequests);
    // No record is created for a rate-limited request.
    assert!(outcome.record_id.is_none());
    assert!(outcome.message.contains("requests/minute"));
    assert!(outcome.message.contains("Try again in"));
    assert!(outcome.rate_limit.unwrap().is_exceeded());
}

#[tokio::test]
async fn replay_does_not_consume_rate_limit_slot() {
    let harness = harness_with(
        Credits::from_whole(100),
        Credits::ZERO,
        Credits::from_hundredths(150),
        RateLimitConfig {
            per_minute: Some(2),
            per_day: None,
        },
    );

    let first = harness
        .engine
        .validate(validate_request(&harness, "req_1"))
        .await
        .unwrap();

    // Replays of the same request must not burn the second (and last) slot.
    for _ in 0..3 {
        let replay = harness
            .engine
            .validate(validate_request(&harness, "req_1"))
            .await
            .unwrap();
        assert_eq!(replay.record_id, first.record_id);
    }

    let fresh = harness
        .engine
        .validate(validate_request(&harness, "req_2"))
        .await
        .unwrap();
    assert_eq!(fresh.access, AccessDecision::Granted);
}

// ============================================================================
// Commit
// ============================================================================

#[tokio::test]
async fn commit_success_charges_quota_once() {
    let harness = harness();

    let outcome = harness
        .engine
        .validate(validate_request(&harness, "req_1"))
        .await
        .unwrap();
    let record_id = outcome.record_id.unwrap();

    let first = harness
        .engine
        .commit(commit_success(&harness, record_id))
        .await
        .unwrap();
    assert!(first.ok);
    assert!(first.message.contains("SUCCESS"));

    let second = harness
        .engine
        .commit(commit_success(&harness, record_id))
        .await
        .unwrap();
    assert!(second.ok);
    assert!(second.message.contains("idempotent"));

    let context = harness.store.get_context(&harness.principal).unwrap().unwrap();
    assert_eq!(context.credits_used, Credits::from_hundredths(150));
}

#[tokio::test]
async fn first_commit_wins_over_conflicting_replay() {
    let harness = harness();

    let outcome = harness
        .engine
        .validate(validate_request(&harness, "req_1"))
        .await
        .unwrap();
    let record_id = outcome.record_id.unwrap();

    let failed = CommitRequest {
        succeeded: false,
        failure: Some(FailureDetail {
            kind: FailureKind::Timeout,
            reason: "Model API timed out after 30s".into(),
        }),
        ..commit_success(&harness, record_id)
    };
    let first = harness.engine.commit(failed).await.unwrap();
    assert!(first.ok);
    assert!(first.message.contains("FAILED"));

    // A later success commit is a no-op replay; status stays Failed.
    let second = harness
        .engine
        .commit(commit_success(&harness, record_id))
        .await
        .unwrap();
    assert!(second.ok);
    assert!(second.message.contains("idempotent"));

    let record = harness.store.get_record(&record_id).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Failed);
    assert_eq!(record.failure.unwrap().kind, FailureKind::Timeout);

    let context = harness.store.get_context(&harness.principal).unwrap().unwrap();
    assert_eq!(context.credits_used, Credits::ZERO);
}

#[tokio::test]
async fn commit_missing_record_is_idempotent_ok() {
    let harness = harness();

    let outcome = harness
        .engine
        .commit(commit_success(&harness, meterd_core::RecordId::generate()))
        .await
        .unwrap();

    assert!(outcome.ok);
    assert!(outcome.message.contains("not found"));
    assert!(outcome.message.contains("idempotent"));
}

#[tokio::test]
async fn commit_ownership_mismatch_is_rejected() {
    let harness = harness();

    let outcome = harness
        .engine
        .validate(validate_request(&harness, "req_1"))
        .await
        .unwrap();
    let record_id = outcome.record_id.unwrap();

    let mut request = commit_success(&harness, record_id);
    request.principal_id = PrincipalId::generate();
    let outcome = harness.engine.commit(request).await.unwrap();

    assert!(!outcome.ok);
    assert!(outcome.message.contains("own"));

    // The record is untouched and still committable by its owner.
    let record = harness.store.get_record(&record_id).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Pending);
}

#[tokio::test]
async fn failed_commit_without_failure_detail_is_invalid() {
    let harness = harness();

    let outcome = harness
        .engine
        .validate(validate_request(&harness, "req_1"))
        .await
        .unwrap();

    let mut request = commit_success(&harness, outcome.record_id.unwrap());
    request.succeeded = false;
    let err = harness.engine.commit(request).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
}

#[tokio::test]
async fn commit_attaches_metrics_and_final_cost_override() {
    let harness = harness();

    let outcome = harness
        .engine
        .validate(validate_request(&harness, "req_1"))
        .await
        .unwrap();
    let record_id = outcome.record_id.unwrap();

    let mut request = commit_success(&harness, record_id);
    request.final_cost = Some(Credits::from_hundredths(225));
    request.metrics = Some(UsageMetrics {
        model_used: Some("gpt-4o".into()),
        input_tokens: Some(1500),
        output_tokens: Some(500),
        latency_ms: Some(1200),
    });
    harness.engine.commit(request).await.unwrap();

    let record = harness.store.get_record(&record_id).unwrap().unwrap();
    assert_eq!(record.final_cost, Some(Credits::from_hundredths(225)));
    assert_eq!(record.metrics.unwrap().model_used.as_deref(), Some("gpt-4o"));

    let context = harness.store.get_context(&harness.principal).unwrap().unwrap();
    assert_eq!(context.credits_used, Credits::from_hundredths(225));
}

#[tokio::test]
async fn result_payload_persisted_only_on_success() {
    let harness = harness();

    let granted = harness
        .engine
        .validate(validate_request(&harness, "req_ok"))
        .await
        .unwrap();
    let ok_record = granted.record_id.unwrap();

    let mut request = commit_success(&harness, ok_record);
    request.result_payload = Some(serde_json::json!({"keywords": ["rust", "tokio"]}));
    harness.engine.commit(request).await.unwrap();

    let stored = harness.store.get_result_for_record(&ok_record).unwrap();
    assert_eq!(stored.unwrap().payload["keywords"][0], "rust");

    let denied = harness
        .engine
        .validate(validate_request(&harness, "req_fail"))
        .await
        .unwrap();
    let failed_record = denied.record_id.unwrap();

    let mut request = commit_success(&harness, failed_record);
    request.succeeded = false;
    request.failure = Some(FailureDetail {
        kind: FailureKind::UpstreamError,
        reason: "Upstream returned 502".into(),
    });
    // A payload supplied on failure is ignored rather than stored.
    request.result_payload = Some(serde_json::json!({"ignored": true}));
    harness.engine.commit(request).await.unwrap();

    assert!(harness
        .store
        .get_result_for_record(&failed_record)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn credits_used_grows_monotonically() {
    let harness = harness();
    let mut expected = Credits::ZERO;

    for i in 0..5 {
        let outcome = harness
            .engine
            .validate(validate_request(&harness, &format!("req_{i}")))
            .await
            .unwrap();
        let record_id = outcome.record_id.unwrap();

        harness
            .engine
            .commit(commit_success(&harness, record_id))
            .await
            .unwrap();
        expected = expected.checked_add(Credits::from_hundredths(150)).unwrap();

        let context = harness.store.get_context(&harness.principal).unwrap().unwrap();
        assert_eq!(context.credits_used, expected);
    }
}
