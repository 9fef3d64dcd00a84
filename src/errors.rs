use thiserror::Error;

use crate::store::StoreError;

/// The central error type for the prefsync engine.
///
/// Every failure is returned as a value; the engine never panics on a remote
/// fault and never retries on its own. A store failure degrades durability
/// but not the in-memory view: the cache stays ahead of the durable copy.
#[derive(Error, Debug)]
pub enum PrefsyncError {
    #[error("No authenticated user for this operation")]
    NotAuthenticated,

    #[error("Failed to read preferences from the store: {0}")]
    StoreRead(#[source] StoreError),

    #[error("Failed to write preferences to the store: {0}")]
    StoreWrite(#[source] StoreError),

    #[error("Durable record for user '{user}' was changed by another session")]
    WriteConflict { user: String },

    #[error("Malformed import at {field}: expected {expected}, found {found}")]
    MalformedImport {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PrefsyncError>;

impl PrefsyncError {
    /// True when retrying the same call later could succeed (transient store
    /// trouble), false for caller mistakes like a missing user or bad import.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PrefsyncError::StoreRead(_) | PrefsyncError::StoreWrite(_)
        )
    }
}
