//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the [`Store`]
//! trait. Values are CBOR-encoded. Compound operations (record insert,
//! commit, expiry sweep) run under a single write lock so the uniqueness
//! constraint and the commit-plus-increment remain atomic, matching the
//! row-locking a relational backend would provide.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use meterd_core::{
    BillingContext, PrincipalId, RecordId, RecordStatus, ResultRecord, UsageRecord,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{apply_commit_update, CommitApplied, CommitUpdate, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn read_record(&self, record_id: &RecordId) -> Result<Option<UsageRecord>> {
        let cf = self.cf(cf::RECORDS)?;
        self.db
            .get_cf(&cf, keys::record_key(record_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }
}

impl Store for RocksStore {
    fn put_context(&self, context: &BillingContext) -> Result<()> {
        let _guard = self.guard();
        let cf = self.cf(cf::CONTEXTS)?;
        let key = keys::context_key(&context.principal_id);
        let value = Self::serialize(context)?;

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_context(&self, principal_id: &PrincipalId) -> Result<Option<BillingContext>> {
        let cf = self.cf(cf::CONTEXTS)?;

        self.db
            .get_cf(&cf, keys::context_key(principal_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn insert_record(&self, record: &UsageRecord) -> Result<()> {
        let _guard = self.guard();

        let cf_records = self.cf(cf::RECORDS)?;
        let cf_idem = self.cf(cf::RECORDS_BY_IDEMPOTENCY)?;

        let idem_key = keys::idempotency_key(
            &record.principal_id,
            &record.client_request_id,
            &record.fingerprint,
        );

        // Uniqueness constraint over (principal, request id, fingerprint).
        let exists = self
            .db
            .get_cf(&cf_idem, &idem_key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        if exists {
            return Err(StoreError::DuplicateRecord {
                client_request_id: record.client_request_id.clone(),
            });
        }

        let record_key = keys::record_key(&record.id);
        let value = Self::serialize(record)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_records, &record_key, &value);
        batch.put_cf(&cf_idem, &idem_key, record.id.as_bytes());

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_record(&self, record_id: &RecordId) -> Result<Option<UsageRecord>> {
        self.read_record(record_id)
    }

    fn find_record_by_idempotency_key(
        &self,
        principal_id: &PrincipalId,
        client_request_id: &str,
        fingerprint: &str,
    ) -> Result<Option<UsageRecord>> {
        let cf_idem = self.cf(cf::RECORDS_BY_IDEMPOTENCY)?;
        let idem_key = keys::idempotency_key(principal_id, client_request_id, fingerprint);

        let Some(id_bytes) = self
            .db
            .get_cf(&cf_idem, idem_key)
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        let uuid = uuid::Uuid::from_slice(&id_bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.read_record(&RecordId::from_uuid(uuid))
    }

    fn commit_record(&self, record_id: &RecordId, update: &CommitUpdate) -> Result<CommitApplied> {
        let _guard = self.guard();

        let mut record = self.read_record(record_id)?.ok_or(StoreError::NotFound)?;

        if record.status.is_terminal() {
            return Ok(CommitApplied::AlreadyTerminal(record));
        }

        let charged = apply_commit_update(&mut record, update);

        let cf_records = self.cf(cf::RECORDS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_records,
            keys::record_key(&record.id),
            Self::serialize(&record)?,
        );

        if let Some(cost) = charged {
            let cf_contexts = self.cf(cf::CONTEXTS)?;
            match self.get_context(&record.principal_id)? {
                Some(mut context) => {
                    context.credits_used = context
                        .credits_used
                        .checked_add(cost)
                        .unwrap_or(context.credits_used);
                    batch.put_cf(
                        &cf_contexts,
                        keys::context_key(&record.principal_id),
                        Self::serialize(&context)?,
                    );
                }
                None => {
                    tracing::warn!(
                        principal_id = %record.principal_id,
                        record_id = %record.id,
                        "Commit charged a record with no billing context; usage not counted"
                    );
                }
            }
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(CommitApplied::Applied(record))
    }

    fn expire_pending(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let _guard = self.guard();

        let cf_records = self.cf(cf::RECORDS)?;
        let now = Utc::now();
        let mut batch = WriteBatch::default();
        let mut expired = 0;

        for item in self.db.iterator_cf(&cf_records, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let mut record: UsageRecord = Self::deserialize(&value)?;

            if record.status == RecordStatus::Pending && record.created_at < older_than {
                record.status = RecordStatus::Expired;
                record.committed_at = Some(now);
                batch.put_cf(&cf_records, key, Self::serialize(&record)?);
                expired += 1;
            }
        }

        if expired > 0 {
            self.db
                .write(batch)
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        Ok(expired)
    }

    fn put_result(&self, result: &ResultRecord) -> Result<()> {
        let _guard = self.guard();

        let cf_results = self.cf(cf::RESULTS_BY_RECORD)?;
        let key = keys::result_key(&result.record_id);

        // Idempotent per usage record: the first stored result wins.
        let exists = self
            .db
            .get_cf(&cf_results, &key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        if exists {
            return Ok(());
        }

        self.db
            .put_cf(&cf_results, key, Self::serialize(result)?)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_result_for_record(&self, record_id: &RecordId) -> Result<Option<ResultRecord>> {
        let cf_results = self.cf(cf::RESULTS_BY_RECORD)?;

        self.db
            .get_cf(&cf_results, keys::result_key(record_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }
}
