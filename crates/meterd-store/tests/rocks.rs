//! `RocksDB` backend integration tests.
//!
//! Exercises the same contract the in-memory backend covers in its unit
//! tests, against a real on-disk database.

#![cfg(feature = "rocksdb-backend")]

use chrono::Utc;
use tempfile::TempDir;

use meterd_core::{
    AccessDecision, BillingContext, ContextId, Credits, FeatureKey, NewUsageRecord, PlanId,
    PrincipalId, RecordStatus, ResultRecord, UsageRecord,
};
use meterd_store::{CommitApplied, CommitUpdate, RocksStore, Store, StoreError};

fn open_store() -> (TempDir, RocksStore) {
    let dir = TempDir::new().expect("create temp dir");
    let store = RocksStore::open(dir.path()).expect("open rocksdb");
    (dir, store)
}

fn pending_record(principal_id: PrincipalId, request_id: &str) -> UsageRecord {
    UsageRecord::pending(NewUsageRecord {
        principal_id,
        context_id: ContextId::generate(),
        client_request_id: request_id.to_string(),
        fingerprint: "a".repeat(64),
        access: AccessDecision::Granted,
        feature_key: FeatureKey::new("api.job_match"),
        endpoint: "/v1/match".into(),
        method: "POST".into(),
        client_ip: Some("102.89.1.22".into()),
        client_user_agent: None,
        usage_estimate: None,
        reserved_cost: Credits::from_hundredths(150),
    })
}

fn seeded_context(store: &RocksStore, allocation: i64) -> BillingContext {
    let context = BillingContext::new(
        PrincipalId::generate(),
        PlanId::generate(),
        Credits::from_whole(allocation),
        Utc::now(),
        Utc::now() + chrono::Duration::days(30),
    );
    store.put_context(&context).unwrap();
    context
}

#[test]
fn context_roundtrip() {
    let (_dir, store) = open_store();
    let context = seeded_context(&store, 100);

    let loaded = store.get_context(&context.principal_id).unwrap().unwrap();
    assert_eq!(loaded.id, context.id);
    assert_eq!(loaded.credits_allocation, Credits::from_whole(100));
    assert_eq!(loaded.credits_used, Credits::ZERO);

    assert!(store
        .get_context(&PrincipalId::generate())
        .unwrap()
        .is_none());
}

#[test]
fn record_roundtrip_preserves_fields() {
    let (_dir, store) = open_store();
    let record = pending_record(PrincipalId::generate(), "req_1");
    store.insert_record(&record).unwrap();

    let loaded = store.get_record(&record.id).unwrap().unwrap();
    assert_eq!(loaded.client_request_id, "req_1");
    assert_eq!(loaded.fingerprint, record.fingerprint);
    assert_eq!(loaded.client_ip.as_deref(), Some("102.89.1.22"));
    assert_eq!(loaded.status, RecordStatus::Pending);
}

#[test]
fn duplicate_insert_is_rejected() {
    let (_dir, store) = open_store();
    let principal = PrincipalId::generate();

    let first = pending_record(principal, "req_1");
    store.insert_record(&first).unwrap();

    let mut duplicate = pending_record(principal, "req_1");
    duplicate.fingerprint = first.fingerprint.clone();
    assert!(matches!(
        store.insert_record(&duplicate),
        Err(StoreError::DuplicateRecord { .. })
    ));

    // Different fingerprint under the same request id is a new record.
    let mut different = pending_record(principal, "req_1");
    different.fingerprint = "b".repeat(64);
    store.insert_record(&different).unwrap();
}

#[test]
fn idempotency_lookup_finds_winner() {
    let (_dir, store) = open_store();
    let record = pending_record(PrincipalId::generate(), "req_1");
    store.insert_record(&record).unwrap();

    let found = store
        .find_record_by_idempotency_key(&record.principal_id, "req_1", &record.fingerprint)
        .unwrap()
        .unwrap();
    assert_eq!(found.id, record.id);

    assert!(store
        .find_record_by_idempotency_key(&record.principal_id, "req_2", &record.fingerprint)
        .unwrap()
        .is_none());
}

#[test]
fn commit_charges_context_exactly_once() {
    let (_dir, store) = open_store();
    let context = seeded_context(&store, 100);

    let record = pending_record(context.principal_id, "req_1");
    store.insert_record(&record).unwrap();

    let update = CommitUpdate {
        succeeded: true,
        ..CommitUpdate::default()
    };

    let first = store.commit_record(&record.id, &update).unwrap();
    assert!(matches!(first, CommitApplied::Applied(_)));

    let second = store.commit_record(&record.id, &update).unwrap();
    assert!(matches!(second, CommitApplied::AlreadyTerminal(_)));

    let context = store.get_context(&context.principal_id).unwrap().unwrap();
    assert_eq!(context.credits_used, Credits::from_hundredths(150));
}

#[test]
fn expire_pending_sweeps_stale_records() {
    let (_dir, store) = open_store();
    let principal = PrincipalId::generate();

    let stale = pending_record(principal, "req_old");
    store.insert_record(&stale).unwrap();

    let cutoff = Utc::now() + chrono::Duration::seconds(1);
    assert_eq!(store.expire_pending(cutoff).unwrap(), 1);
    // A second sweep finds nothing pending.
    assert_eq!(store.expire_pending(cutoff).unwrap(), 0);

    let record = store.get_record(&stale.id).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Expired);
    assert!(record.committed_at.is_some());
}

#[test]
fn result_payload_first_write_wins() {
    let (_dir, store) = open_store();
    let record = pending_record(PrincipalId::generate(), "req_1");
    store.insert_record(&record).unwrap();

    let first = ResultRecord::new(&record, serde_json::json!({"keywords": ["rust"]}));
    let second = ResultRecord::new(&record, serde_json::json!({"keywords": ["other"]}));
    store.put_result(&first).unwrap();
    store.put_result(&second).unwrap();

    let stored = store.get_result_for_record(&record.id).unwrap().unwrap();
    assert_eq!(stored.id, first.id);
    assert_eq!(stored.payload["keywords"][0], "rust");
}
