//! Unit tests for prefsync, driven through the public API only.
//!
//! These exercise whole sessions against the in-memory store, on virtual
//! time, without touching engine internals.

mod test_session_flow;
mod test_snapshots;

/// Route engine logs through the test writer so `--nocapture` shows them.
/// Repeated calls are fine; only the first subscriber wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prefsync=debug".into()),
        )
        .with_test_writer()
        .try_init();
}
