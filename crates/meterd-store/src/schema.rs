//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Billing contexts, keyed by `principal_id`.
    pub const CONTEXTS: &str = "contexts";

    /// Usage records, keyed by `record_id`.
    pub const RECORDS: &str = "records";

    /// Idempotency index, keyed by
    /// `principal_id || len(client_request_id) || client_request_id || fingerprint`.
    /// Value is the 16-byte record ID.
    pub const RECORDS_BY_IDEMPOTENCY: &str = "records_by_idempotency";

    /// Result payloads, keyed by the owning `record_id` (unique per record).
    pub const RESULTS_BY_RECORD: &str = "results_by_record";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::CONTEXTS,
        cf::RECORDS,
        cf::RECORDS_BY_IDEMPOTENCY,
        cf::RESULTS_BY_RECORD,
    ]
}
