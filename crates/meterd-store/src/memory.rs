//! In-memory storage implementation.
//!
//! A mutex-guarded backend used in tests and single-process deployments.
//! Every operation holds the one lock, which trivially provides the
//! atomicity the [`Store`] contract requires.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use meterd_core::{BillingContext, PrincipalId, RecordId, RecordStatus, ResultRecord, UsageRecord};

use crate::error::{Result, StoreError};
use crate::{apply_commit_update, CommitApplied, CommitUpdate, Store};

/// In-memory store backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    contexts: HashMap<PrincipalId, BillingContext>,
    records: HashMap<RecordId, UsageRecord>,
    idempotency: HashMap<(PrincipalId, String, String), RecordId>,
    results_by_record: HashMap<RecordId, ResultRecord>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock means a panic mid-write in another thread; the
        // data is still structurally valid, so recover the guard.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    fn put_context(&self, context: &BillingContext) -> Result<()> {
        self.lock()
            .contexts
            .insert(context.principal_id, context.clone());
        Ok(())
    }

    fn get_context(&self, principal_id: &PrincipalId) -> Result<Option<BillingContext>> {
        Ok(self.lock().contexts.get(principal_id).cloned())
    }

    fn insert_record(&self, record: &UsageRecord) -> Result<()> {
        let mut inner = self.lock();
        let key = (
            record.principal_id,
            record.client_request_id.clone(),
            record.fingerprint.clone(),
        );

        if inner.idempotency.contains_key(&key) {
            return Err(StoreError::DuplicateRecord {
                client_request_id: record.client_request_id.clone(),
            });
        }

        inner.idempotency.insert(key, record.id);
        inner.records.insert(record.id, record.clone());
        Ok(())
    }

    fn get_record(&self, record_id: &RecordId) -> Result<Option<UsageRecord>> {
        Ok(self.lock().records.get(record_id).cloned())
    }

    fn find_record_by_idempotency_key(
        &self,
        principal_id: &PrincipalId,
        client_request_id: &str,
        fingerprint: &str,
    ) -> Result<Option<UsageRecord>> {
        let inner = self.lock();
        let key = (
            *principal_id,
            client_request_id.to_string(),
            fingerprint.to_string(),
        );
        Ok(inner
            .idempotency
            .get(&key)
            .and_then(|id| inner.records.get(id))
            .cloned())
    }

    fn commit_record(&self, record_id: &RecordId, update: &CommitUpdate) -> Result<CommitApplied> {
        let mut inner = self.lock();

        let record = inner.records.get_mut(record_id).ok_or(StoreError::NotFound)?;

        if record.status.is_terminal() {
            return Ok(CommitApplied::AlreadyTerminal(record.clone()));
        }

        let charged = apply_commit_update(record, update);
        let committed = record.clone();

        if let Some(cost) = charged {
            if let Some(context) = inner.contexts.get_mut(&committed.principal_id) {
                context.credits_used = context
                    .credits_used
                    .checked_add(cost)
                    .unwrap_or(context.credits_used);
            } else {
                tracing::warn!(
                    principal_id = %committed.principal_id,
                    record_id = %committed.id,
                    "Commit charged a record with no billing context; usage not counted"
                );
            }
        }

        Ok(CommitApplied::Applied(committed))
    }

    fn expire_pending(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.lock();
        let now = Utc::now();
        let mut expired = 0;

        for record in inner.records.values_mut() {
            if record.status == RecordStatus::Pending && record.created_at < older_than {
                record.status = RecordStatus::Expired;
                record.committed_at = Some(now);
                expired += 1;
            }
        }

        Ok(expired)
    }

    fn put_result(&self, result: &ResultRecord) -> Result<()> {
        let mut inner = self.lock();
        inner
            .results_by_record
            .entry(result.record_id)
            .or_insert_with(|| result.clone());
        Ok(())
    }

    fn get_result_for_record(&self, record_id: &RecordId) -> Result<Option<ResultRecord>> {
        Ok(self.lock().results_by_record.get(record_id).cloned())
    }
}
