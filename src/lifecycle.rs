//! Lifecycle Bridge
//!
//! The host environment owns the signals that matter for durability: the
//! session is ending, or the view lost the foreground. Both mean "pending
//! edits may never get another chance", so both map onto a forced flush.
//! The embedding application wires its own event sources to [`LifecycleBridge::notify`].

use tracing::{info, warn};

use crate::engine::{FlushOutcome, SyncEngine};
use crate::errors::Result;

/// Host-environment signals consumed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The execution context is about to be discarded. Flush, then drop the
    /// user's working copy.
    SessionEnding,
    /// The view is no longer visible but the process keeps running. Flush,
    /// keep the cache warm.
    ForegroundLost,
}

impl std::fmt::Display for LifecycleSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleSignal::SessionEnding => write!(f, "session-ending"),
            LifecycleSignal::ForegroundLost => write!(f, "foreground-lost"),
        }
    }
}

/// Maps lifecycle signals onto engine flushes.
#[derive(Clone)]
pub struct LifecycleBridge {
    engine: SyncEngine,
}

impl LifecycleBridge {
    pub fn new(engine: SyncEngine) -> Self {
        Self { engine }
    }

    /// Handle one signal for one user.
    ///
    /// Best effort by design: one durable write at most, no retries, so the
    /// host is never blocked on teardown. If the write fails here the most
    /// recent unflushed edit is lost; that is the accepted durability bound.
    pub async fn notify(
        &self,
        signal: LifecycleSignal,
        user_id: Option<&str>,
    ) -> Result<FlushOutcome> {
        info!(signal = %signal, "lifecycle signal received");
        let outcome = match self.engine.force_flush_all(user_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(signal = %signal, error = %err, "lifecycle flush failed");
                return Err(err);
            }
        };
        if signal == LifecycleSignal::SessionEnding {
            self.engine.invalidate(user_id)?;
        }
        Ok(outcome)
    }
}
