//! Write Coalescer
//!
//! Rapid successive edits (a user toggling a handful of checkboxes) would
//! otherwise each cost a durable write. The coalescer keeps at most one
//! pending write per user: a new schedule for the same user cancels the
//! previous timer and replaces the payload with the newest full merge, which
//! already folds in every earlier pending edit. The trade is an at-most-one-
//! delay durability lag for a large reduction in write volume.
//!
//! Timers are generation-guarded: a timer callback that loses the race with a
//! forced flush or a replacement finds its generation gone from the table and
//! does nothing, so a flush can never fire twice for the same payload.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::prefs::Preferences;

/// Default delay before a pending write is flushed durably.
pub const DEFAULT_COALESCE_DELAY: Duration = Duration::from_secs(1);

struct PendingWrite {
    snapshot: Preferences,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

/// Per-user pending-write table with cancellable timers.
pub struct WriteCoalescer {
    pending: Arc<Mutex<HashMap<String, PendingWrite>>>,
    next_generation: AtomicU64,
}

impl WriteCoalescer {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Defer a durable write of `snapshot` by `delay`.
    ///
    /// Any pending write for the same user is cancelled and superseded; the
    /// snapshot is the full merged state, not a diff, so the newest schedule
    /// carries everything earlier ones did. When the timer expires, `flush`
    /// is invoked with the payload and the entry is cleared.
    pub fn schedule<F, Fut>(
        &self,
        user_id: &str,
        snapshot: Preferences,
        delay: Duration,
        flush: F,
    ) where
        F: FnOnce(String, Preferences) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let user = user_id.to_string();

        // Install the payload before the timer exists so a firing timer can
        // never observe a half-registered entry.
        {
            let mut table = self.pending.lock();
            if let Some(old) = table.insert(
                user.clone(),
                PendingWrite {
                    snapshot,
                    generation,
                    timer: None,
                },
            ) {
                debug!(user = %user, "superseding pending write");
                if let Some(timer) = old.timer {
                    timer.abort();
                }
            }
        }

        let timer = tokio::spawn({
            let pending = Arc::clone(&self.pending);
            let user = user.clone();
            async move {
                tokio::time::sleep(delay).await;
                let payload = {
                    let mut table = pending.lock();
                    match table.get(&user) {
                        Some(entry) if entry.generation == generation => {
                            table.remove(&user).map(|e| e.snapshot)
                        }
                        // Superseded or force-flushed while we slept.
                        _ => None,
                    }
                };
                if let Some(snapshot) = payload {
                    debug!(user = %user, "coalescing timer expired, flushing");
                    flush(user, snapshot).await;
                }
            }
        });

        let mut table = self.pending.lock();
        if let Some(entry) = table.get_mut(&user) {
            if entry.generation == generation {
                entry.timer = Some(timer);
            }
        }
        // Entry gone or owned by a newer generation: the timer may already be
        // past its generation check and inside `flush`, so aborting here could
        // tear a durable write. Dropping the handle is enough; a timer that
        // has not fired yet finds its generation missing and does nothing.
    }

    /// Cancel the timer and hand the pending payload to the caller for an
    /// immediate durable write. `None` means nothing to flush.
    pub fn take_pending(&self, user_id: &str) -> Option<Preferences> {
        let mut table = self.pending.lock();
        table.remove(user_id).map(|entry| {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            entry.snapshot
        })
    }

    /// Cancel and drop a pending write without flushing it. Used when a
    /// full-replace (reset, import) makes the pending edits moot.
    pub fn discard(&self, user_id: &str) -> bool {
        let discarded = self.take_pending(user_id).is_some();
        if discarded {
            debug!(user = %user_id, "pending write discarded");
        }
        discarded
    }

    /// Drop every pending write without flushing. Teardown path.
    pub fn discard_all(&self) {
        let mut table = self.pending.lock();
        for (_, entry) in table.drain() {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
    }

    pub fn has_pending(&self, user_id: &str) -> bool {
        self.pending.lock().contains_key(user_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Default for WriteCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WriteCoalescer {
    fn drop(&mut self) {
        self.discard_all();
    }
}
