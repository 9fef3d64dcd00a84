//! In-Process Preference Cache
//!
//! One entry per active user: the most recent locally merged snapshot, when
//! it was cached, and the store revision it was last confirmed against. The
//! snapshot is always ahead of or equal to the durable copy, never behind it,
//! so reads can be served from here with zero latency even while a coalesced
//! write is still pending.
//!
//! Staleness is advisory: an entry older than the TTL is fetch-worthy but is
//! never evicted on its own, which keeps a stale-but-available fallback
//! around when the store is unreachable.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::prefs::Preferences;

/// Default time-to-live before a cached snapshot is re-fetched.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// One user's cached state.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub snapshot: Preferences,
    pub cached_at: Instant,
    /// Store revision this entry was last confirmed against; 0 until the
    /// first durable round-trip completes.
    pub revision: u64,
}

/// Per-user snapshot table with a TTL staleness policy.
#[derive(Debug)]
pub struct PreferenceCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
}

impl PreferenceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, user_id: &str) -> Option<&CacheEntry> {
        self.entries.get(user_id)
    }

    /// Clone of the cached snapshot regardless of age. The cache is ahead of
    /// the store, so this is the correct base for any local merge.
    pub fn snapshot(&self, user_id: &str) -> Option<Preferences> {
        self.entries.get(user_id).map(|e| e.snapshot.clone())
    }

    /// Snapshot only when the entry is younger than the TTL.
    pub fn fresh_snapshot(&self, user_id: &str) -> Option<Preferences> {
        self.entries
            .get(user_id)
            .filter(|e| e.cached_at.elapsed() <= self.ttl)
            .map(|e| e.snapshot.clone())
    }

    pub fn revision(&self, user_id: &str) -> u64 {
        self.entries.get(user_id).map(|e| e.revision).unwrap_or(0)
    }

    /// Store a snapshot unconditionally. Last writer wins within a single
    /// execution context.
    pub fn put(&mut self, user_id: &str, snapshot: Preferences, revision: u64) {
        self.entries.insert(
            user_id.to_string(),
            CacheEntry {
                snapshot,
                cached_at: Instant::now(),
                revision,
            },
        );
    }

    /// Record a successful durable write: refresh the entry's age and
    /// revision without touching the snapshot, which may already have moved
    /// past the payload that was flushed.
    pub fn confirm_write(&mut self, user_id: &str, revision: u64) {
        if let Some(entry) = self.entries.get_mut(user_id) {
            entry.cached_at = Instant::now();
            entry.revision = revision;
        }
    }

    pub fn invalidate(&mut self, user_id: &str) -> bool {
        let removed = self.entries.remove(user_id).is_some();
        if removed {
            debug!(user = %user_id, "cache entry invalidated");
        }
        removed
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PreferenceCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}
