//! Preference Sync Engine
//!
//! The public orchestrator over the cache, the coalescer, and the durable
//! store. All state lives in owned tables behind one engine instance; there
//! are no module-level singletons, so two engines never share anything.
//!
//! Control flow for an edit: merge into the cached snapshot synchronously
//! (reads observe it with zero latency), then hand the merged snapshot to the
//! coalescer. After the delay, or on a forced flush, the snapshot is written
//! durably and the store's receipt re-stamps the cache entry. Every mutating
//! operation writes the cache before any asynchronous store call begins, so
//! for a single user the cache always reflects the causally latest merge.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::PreferenceCache;
use crate::coalescer::WriteCoalescer;
use crate::config::EngineConfig;
use crate::errors::{PrefsyncError, Result};
use crate::prefs::{default_template, ExportEnvelope, Preferences};
use crate::store::{PreferenceStore, StoreError};

/// Result of a forced flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// A pending write existed and was written durably.
    Flushed,
    /// Nothing was pending.
    Idle,
}

struct EngineInner {
    store: Arc<dyn PreferenceStore>,
    config: EngineConfig,
    cache: Mutex<PreferenceCache>,
    coalescer: WriteCoalescer,
}

/// The user-preference synchronization engine.
///
/// Cheap to clone; clones share the same cache and pending-write tables.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn PreferenceStore>, config: EngineConfig) -> Self {
        let cache = PreferenceCache::new(config.cache_ttl());
        Self {
            inner: Arc::new(EngineInner {
                store,
                config,
                cache: Mutex::new(cache),
                coalescer: WriteCoalescer::new(),
            }),
        }
    }

    pub fn with_defaults(store: Arc<dyn PreferenceStore>) -> Self {
        Self::new(store, EngineConfig::default())
    }

    /// Fetch the current preferences for a user.
    ///
    /// A fresh cache entry short-circuits. Otherwise the store is consulted:
    /// a missing record is synthesized from the default template and
    /// inserted; an existing record is merged over the template so fields
    /// introduced since it was written take their defaults. A read failure is
    /// surfaced as-is and the cache is left untouched, so a stale entry stays
    /// available to the cache-hit paths.
    pub async fn fetch(&self, user_id: Option<&str>) -> Result<Preferences> {
        let user = require_user(user_id)?;

        if let Some(snapshot) = self.inner.cache.lock().fresh_snapshot(&user) {
            debug!(user = %user, "preference fetch served from cache");
            return Ok(snapshot);
        }

        match self.inner.store.read_one(&user).await {
            Ok(Some(stored)) => {
                let merged = default_template().merged_with(&stored.record);
                self.inner
                    .cache
                    .lock()
                    .put(&user, merged.clone(), stored.revision);
                debug!(user = %user, revision = stored.revision, "preferences fetched from store");
                Ok(merged)
            }
            Ok(None) => {
                let mut fresh = default_template().clone();
                fresh.stamp();
                let receipt = self
                    .inner
                    .store
                    .insert_one(&user, &fresh)
                    .await
                    .map_err(PrefsyncError::StoreWrite)?;
                self.inner
                    .cache
                    .lock()
                    .put(&user, fresh.clone(), receipt.revision);
                info!(user = %user, "initialized preferences from default template");
                Ok(fresh)
            }
            Err(err) => {
                warn!(user = %user, error = %err, "preference read failed, cache left untouched");
                Err(PrefsyncError::StoreRead(err))
            }
        }
    }

    /// Update a single top-level field. Coalesced.
    pub async fn update_one(
        &self,
        user_id: Option<&str>,
        key: &str,
        value: Value,
    ) -> Result<Preferences> {
        let mut patch = Preferences::new();
        patch.set(key, value);
        self.update_many(user_id, patch, false).await
    }

    /// Merge a partial preference object over the current snapshot.
    ///
    /// The merge lands in the cache synchronously; the durable write is
    /// coalesced unless `immediate` is set, in which case it happens before
    /// this call returns (any pending write is discarded first, since the
    /// merged snapshot already folds it in).
    pub async fn update_many(
        &self,
        user_id: Option<&str>,
        patch: Preferences,
        immediate: bool,
    ) -> Result<Preferences> {
        let user = require_user(user_id)?;

        let base = self.inner.cache.lock().snapshot(&user);
        let mut merged = match base {
            Some(snapshot) => snapshot,
            None => self.fetch(Some(&user)).await?,
        };
        merged.merge_from(&patch);
        merged.stamp();

        {
            let mut cache = self.inner.cache.lock();
            let revision = cache.revision(&user);
            cache.put(&user, merged.clone(), revision);
        }

        if immediate {
            self.inner.coalescer.discard(&user);
            self.inner.flush_user(&user, &merged).await?;
        } else {
            let inner = Arc::clone(&self.inner);
            self.inner.coalescer.schedule(
                &user,
                merged.clone(),
                self.inner.config.coalesce_delay(),
                move |user, snapshot| async move {
                    if let Err(err) = inner.flush_user(&user, &snapshot).await {
                        warn!(
                            user = %user,
                            error = %err,
                            "scheduled flush failed, edit remains cached but not durable"
                        );
                    }
                },
            );
        }

        Ok(merged)
    }

    /// Restore a user to the default template, durably and in cache.
    ///
    /// Any pending coalesced write is discarded without being applied: reset
    /// wins over in-flight edits.
    pub async fn reset(&self, user_id: Option<&str>) -> Result<Preferences> {
        let user = require_user(user_id)?;

        if self.inner.coalescer.discard(&user) {
            debug!(user = %user, "pending write discarded by reset");
        }

        let mut fresh = default_template().clone();
        fresh.stamp();
        let receipt = self.inner.replace_record(&user, &fresh).await?;
        self.inner
            .cache
            .lock()
            .put(&user, fresh.clone(), receipt.revision);
        info!(user = %user, "preferences reset to defaults");
        Ok(fresh)
    }

    /// Export what the user currently sees: the cached snapshot (fetched on
    /// demand), including edits that have not been durably flushed yet,
    /// wrapped with export metadata.
    pub async fn export_snapshot(&self, user_id: Option<&str>) -> Result<ExportEnvelope> {
        let user = require_user(user_id)?;

        let cached = self.inner.cache.lock().snapshot(&user);
        let snapshot = match cached {
            Some(snapshot) => snapshot,
            None => self.fetch(Some(&user)).await?,
        };
        Ok(ExportEnvelope::wrap(snapshot))
    }

    /// Import a partial preference object.
    ///
    /// The payload is validated structurally and merged over the default
    /// template, never over the existing record: import is a full replace
    /// with defaulting, not a field-level patch. It is a rare, deliberate
    /// action, so the durable write bypasses coalescing.
    pub async fn import_snapshot(
        &self,
        user_id: Option<&str>,
        payload: Value,
    ) -> Result<Preferences> {
        let user = require_user(user_id)?;

        let incoming =
            Preferences::from_value(payload.clone()).ok_or_else(|| PrefsyncError::MalformedImport {
                field: "$".to_string(),
                expected: "object".to_string(),
                found: json_kind(&payload).to_string(),
            })?;
        let sanitized = incoming.conformed_to(default_template())?;

        let mut merged = default_template().merged_with(&sanitized);
        merged.stamp();

        if self.inner.coalescer.discard(&user) {
            debug!(user = %user, "pending write discarded by import");
        }
        let receipt = self.inner.replace_record(&user, &merged).await?;
        self.inner
            .cache
            .lock()
            .put(&user, merged.clone(), receipt.revision);
        info!(user = %user, "preferences imported");
        Ok(merged)
    }

    /// Flush any pending coalesced write for this user right now.
    ///
    /// Intended for lifecycle signals (session ending, view hidden). Best
    /// effort: exactly one store call, no rescheduling, so if the host tears
    /// the process down mid-write the most recent unflushed edit is lost
    /// rather than blocking teardown.
    pub async fn force_flush_all(&self, user_id: Option<&str>) -> Result<FlushOutcome> {
        let user = require_user(user_id)?;

        match self.inner.coalescer.take_pending(&user) {
            Some(snapshot) => {
                self.inner.flush_user(&user, &snapshot).await?;
                debug!(user = %user, "forced flush completed");
                Ok(FlushOutcome::Flushed)
            }
            None => Ok(FlushOutcome::Idle),
        }
    }

    /// Drop the cache entry for a user. The next fetch consults the store.
    pub fn invalidate(&self, user_id: Option<&str>) -> Result<()> {
        let user = require_user(user_id)?;
        self.inner.cache.lock().invalidate(&user);
        Ok(())
    }

    /// Drop every cache entry.
    pub fn invalidate_all(&self) {
        self.inner.cache.lock().invalidate_all();
    }

    /// Whether a coalesced write is still pending for this user.
    pub fn has_pending_write(&self, user_id: &str) -> bool {
        self.inner.coalescer.has_pending(user_id)
    }
}

impl EngineInner {
    /// Write `snapshot` durably against the revision the cache last observed
    /// and re-stamp the cache entry from the receipt. A store-side revision
    /// mismatch means another session flushed in the meantime; that is
    /// surfaced as a conflict instead of clobbering it.
    async fn flush_user(&self, user: &str, snapshot: &Preferences) -> Result<()> {
        let revision = self.cache.lock().revision(user);
        let expected = (revision > 0).then_some(revision);

        match self.store.update_one(user, snapshot, expected).await {
            Ok(receipt) => {
                self.cache.lock().confirm_write(user, receipt.revision);
                debug!(user = %user, revision = receipt.revision, "durable write confirmed");
                Ok(())
            }
            Err(StoreError::RevisionMismatch { expected, stored }) => {
                warn!(
                    user = %user,
                    expected,
                    stored,
                    "durable record changed by another session"
                );
                Err(PrefsyncError::WriteConflict {
                    user: user.to_string(),
                })
            }
            Err(err) => Err(PrefsyncError::StoreWrite(err)),
        }
    }

    /// Unconditional full replace (reset, import). Falls back to insert when
    /// the user has no record yet.
    async fn replace_record(
        &self,
        user: &str,
        prefs: &Preferences,
    ) -> Result<crate::store::WriteReceipt> {
        match self.store.update_one(user, prefs, None).await {
            Ok(receipt) => Ok(receipt),
            Err(StoreError::NotFound(_)) => self
                .store
                .insert_one(user, prefs)
                .await
                .map_err(PrefsyncError::StoreWrite),
            Err(err) => Err(PrefsyncError::StoreWrite(err)),
        }
    }
}

fn require_user(user_id: Option<&str>) -> Result<String> {
    match user_id {
        Some(user) if !user.trim().is_empty() => Ok(user.to_string()),
        _ => Err(PrefsyncError::NotAuthenticated),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
