//! Durable Preference Store
//!
//! The remote store is a key-value service holding one preference record per
//! user. The engine only consumes the four-operation contract below; the
//! transport and query language behind it are someone else's problem.
//!
//! Durable writes carry an optional expected revision. A caller that passes
//! the revision it last observed gets a `RevisionMismatch` instead of
//! silently clobbering a record another session wrote in the meantime.
//! Full-replace operations (reset, import) pass `None` and win by design.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;

use crate::prefs::Preferences;

/// Failure surfaced by the durable store, `{ message, code }`-shaped.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("transport failure ({code}): {message}")]
    Transport { code: String, message: String },

    #[error("permission denied ({code}): {message}")]
    PermissionDenied { code: String, message: String },

    #[error("revision mismatch: expected {expected}, stored {stored}")]
    RevisionMismatch { expected: u64, stored: u64 },

    #[error("no record for user '{0}'")]
    NotFound(String),
}

/// A persisted preference record as the store returns it.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub record: Preferences,
    pub stored_at: DateTime<Utc>,
    pub revision: u64,
}

/// Acknowledgement of a durable write.
#[derive(Debug, Clone, Copy)]
pub struct WriteReceipt {
    pub stored_at: DateTime<Utc>,
    pub revision: u64,
}

/// The remote store contract consumed by the sync engine.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Read the record for one user, `None` when no record exists.
    async fn read_one(&self, user_id: &str) -> Result<Option<StoredRecord>, StoreError>;

    /// Create the record for a user that has none yet.
    async fn insert_one(
        &self,
        user_id: &str,
        prefs: &Preferences,
    ) -> Result<WriteReceipt, StoreError>;

    /// Replace an existing record. When `expected_revision` is `Some` and the
    /// stored revision differs, the write is refused with `RevisionMismatch`.
    async fn update_one(
        &self,
        user_id: &str,
        prefs: &Preferences,
        expected_revision: Option<u64>,
    ) -> Result<WriteReceipt, StoreError>;

    /// Remove a user's record entirely.
    async fn delete_one(&self, user_id: &str) -> Result<(), StoreError>;
}

/// In-process reference store used by tests and demos.
///
/// Tracks a write log and failure toggles so tests can count durable writes
/// and simulate transport trouble.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, StoredRecord>>,
    update_log: Mutex<Vec<(String, Preferences)>>,
    insert_count: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent reads fail with a transport error.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent writes fail with a transport error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `insert_one` calls observed.
    pub fn insert_count(&self) -> u64 {
        self.insert_count.load(Ordering::SeqCst)
    }

    /// Number of `update_one` calls observed.
    pub fn update_count(&self) -> usize {
        self.update_log.lock().len()
    }

    /// Payload of the most recent `update_one` for `user_id`.
    pub fn last_update(&self, user_id: &str) -> Option<Preferences> {
        self.update_log
            .lock()
            .iter()
            .rev()
            .find(|(user, _)| user == user_id)
            .map(|(_, prefs)| prefs.clone())
    }

    /// Current durable record, bypassing the trait (test inspection).
    pub fn record(&self, user_id: &str) -> Option<StoredRecord> {
        self.records.lock().get(user_id).cloned()
    }

    /// Overwrite a record out-of-band, bumping its revision. Stands in for
    /// another device flushing against the same store.
    pub fn write_externally(&self, user_id: &str, prefs: Preferences) {
        let mut records = self.records.lock();
        let revision = records.get(user_id).map(|r| r.revision).unwrap_or(0) + 1;
        records.insert(
            user_id.to_string(),
            StoredRecord {
                record: prefs,
                stored_at: Utc::now(),
                revision,
            },
        );
    }

    fn transport_error() -> StoreError {
        StoreError::Transport {
            code: "UNAVAILABLE".to_string(),
            message: "simulated outage".to_string(),
        }
    }
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn read_one(&self, user_id: &str) -> Result<Option<StoredRecord>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::transport_error());
        }
        Ok(self.records.lock().get(user_id).cloned())
    }

    async fn insert_one(
        &self,
        user_id: &str,
        prefs: &Preferences,
    ) -> Result<WriteReceipt, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::transport_error());
        }
        let mut records = self.records.lock();
        if records.contains_key(user_id) {
            return Err(StoreError::Transport {
                code: "DUPLICATE".to_string(),
                message: format!("record already exists for user '{user_id}'"),
            });
        }
        let receipt = WriteReceipt {
            stored_at: Utc::now(),
            revision: 1,
        };
        records.insert(
            user_id.to_string(),
            StoredRecord {
                record: prefs.clone(),
                stored_at: receipt.stored_at,
                revision: receipt.revision,
            },
        );
        self.insert_count.fetch_add(1, Ordering::SeqCst);
        Ok(receipt)
    }

    async fn update_one(
        &self,
        user_id: &str,
        prefs: &Preferences,
        expected_revision: Option<u64>,
    ) -> Result<WriteReceipt, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::transport_error());
        }
        let mut records = self.records.lock();
        let Some(existing) = records.get(user_id) else {
            return Err(StoreError::NotFound(user_id.to_string()));
        };
        if let Some(expected) = expected_revision {
            if existing.revision != expected {
                return Err(StoreError::RevisionMismatch {
                    expected,
                    stored: existing.revision,
                });
            }
        }
        let receipt = WriteReceipt {
            stored_at: Utc::now(),
            revision: existing.revision + 1,
        };
        records.insert(
            user_id.to_string(),
            StoredRecord {
                record: prefs.clone(),
                stored_at: receipt.stored_at,
                revision: receipt.revision,
            },
        );
        self.update_log
            .lock()
            .push((user_id.to_string(), prefs.clone()));
        Ok(receipt)
    }

    async fn delete_one(&self, user_id: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::transport_error());
        }
        self.records.lock().remove(user_id);
        Ok(())
    }
}
