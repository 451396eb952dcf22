//! Storage layer for meterd.
//!
//! This crate defines the persistence contract consumed by the metering
//! engine, plus two backends:
//!
//! - [`MemoryStore`]: mutex-guarded in-memory backend for tests and
//!   single-process deployments.
//! - `RocksStore`: `RocksDB` backend with column families (behind the
//!   `rocksdb-backend` feature).
//!
//! # Contract
//!
//! The engine depends on three storage guarantees:
//!
//! 1. A uniqueness constraint over (`principal_id`, `client_request_id`,
//!    `fingerprint`): concurrent duplicate inserts are serialized, losers
//!    observe [`StoreError::DuplicateRecord`] and re-read the winner.
//! 2. [`Store::commit_record`] performs the `Pending` → terminal transition
//!    and the `credits_used` increment as one atomic operation; exactly one
//!    caller ever applies it.
//! 3. `credits_used` increments are atomic relative to concurrent commits
//!    for the same principal (no unguarded read-modify-write).

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
#[cfg(feature = "rocksdb-backend")]
pub mod keys;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};

use meterd_core::{
    BillingContext, Credits, FailureDetail, PrincipalId, RecordId, RecordStatus, ResultRecord,
    UsageMetrics, UsageRecord,
};

/// Fields written when a pending record commits.
#[derive(Debug, Clone, Default)]
pub struct CommitUpdate {
    /// `true` commits the record as `Success`, `false` as `Failed`.
    pub succeeded: bool,

    /// Override for the charged cost. Defaults to the reserved estimate.
    pub final_cost: Option<Credits>,

    /// Outcome metrics to attach (success only).
    pub metrics: Option<UsageMetrics>,

    /// Failure classification to attach (failure only).
    pub failure: Option<FailureDetail>,
}

/// Result of a [`Store::commit_record`] call.
#[derive(Debug, Clone)]
pub enum CommitApplied {
    /// This call performed the `Pending` → terminal transition. For a
    /// success commit the billing context increment happened in the same
    /// operation.
    Applied(UsageRecord),

    /// The record was already terminal; nothing was written.
    AlreadyTerminal(UsageRecord),
}

impl CommitApplied {
    /// The record in its post-call state.
    #[must_use]
    pub fn record(&self) -> &UsageRecord {
        match self {
            Self::Applied(record) | Self::AlreadyTerminal(record) => record,
        }
    }
}

/// Apply a commit update to a pending record in place.
///
/// Shared between backends so the transition semantics cannot drift.
/// Returns the charged cost when the record commits as `Success`; the
/// caller is responsible for incrementing the billing context inside the
/// same guarded operation.
pub(crate) fn apply_commit_update(
    record: &mut UsageRecord,
    update: &CommitUpdate,
) -> Option<Credits> {
    record.status = if update.succeeded {
        RecordStatus::Success
    } else {
        RecordStatus::Failed
    };
    record.committed_at = Some(Utc::now());

    if update.succeeded {
        if let Some(metrics) = &update.metrics {
            record.metrics = Some(metrics.clone());
        }
        let cost = update.final_cost.unwrap_or(record.reserved_cost);
        record.final_cost = Some(cost);
        Some(cost)
    } else {
        if let Some(failure) = &update.failure {
            record.failure = Some(failure.clone());
        }
        None
    }
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing different backends
/// (`RocksDB`, in-memory for testing, or an external relational store).
pub trait Store: Send + Sync {
    // =========================================================================
    // Billing Context Operations
    // =========================================================================

    /// Insert or update a billing context.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_context(&self, context: &BillingContext) -> Result<()>;

    /// Get the billing context for a principal.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_context(&self, principal_id: &PrincipalId) -> Result<Option<BillingContext>>;

    // =========================================================================
    // Usage Record Operations
    // =========================================================================

    /// Insert a new usage record, enforcing the idempotency uniqueness
    /// constraint over (`principal_id`, `client_request_id`, `fingerprint`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateRecord`] if a record with the same
    /// idempotency key already exists.
    fn insert_record(&self, record: &UsageRecord) -> Result<()>;

    /// Get a usage record by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_record(&self, record_id: &RecordId) -> Result<Option<UsageRecord>>;

    /// Look up a usage record by its idempotency key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_record_by_idempotency_key(
        &self,
        principal_id: &PrincipalId,
        client_request_id: &str,
        fingerprint: &str,
    ) -> Result<Option<UsageRecord>>;

    // =========================================================================
    // Compound Operations
    // =========================================================================

    /// Commit a pending record: transition `Pending` → `Success`/`Failed`,
    /// set `committed_at` and `final_cost`, attach metrics or failure detail,
    /// and, on success, atomically increment the owning context's
    /// `credits_used` by the final cost, all in one guarded operation.
    ///
    /// Safe to call concurrently for the same record: exactly one caller
    /// receives [`CommitApplied::Applied`]; the rest observe
    /// [`CommitApplied::AlreadyTerminal`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record does not exist.
    fn commit_record(&self, record_id: &RecordId, update: &CommitUpdate) -> Result<CommitApplied>;

    /// Expire records left `Pending` since before `older_than`.
    ///
    /// Returns the number of records transitioned to `Expired`. Invoked by
    /// an external sweeper; the engine only recognizes `Expired` as
    /// terminal.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn expire_pending(&self, older_than: DateTime<Utc>) -> Result<usize>;

    // =========================================================================
    // Result Record Operations
    // =========================================================================

    /// Persist the result payload produced by a successful commit.
    ///
    /// Idempotent per usage record: if a result already exists for
    /// `result.record_id`, the call is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_result(&self, result: &ResultRecord) -> Result<()>;

    /// Get the result payload for a usage record, if one was stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_result_for_record(&self, record_id: &RecordId) -> Result<Option<ResultRecord>>;
}
