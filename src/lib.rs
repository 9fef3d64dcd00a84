//! Prefsync - User Preference Synchronization
//!
//! Keeps an in-memory, per-user preference object consistent with a remote
//! persisted copy while coalescing rapid local edits into infrequent durable
//! writes.
//!
//! - **Cache-ahead reads**: every edit lands in the in-process cache
//!   synchronously, so the application always sees its own writes
//! - **Coalesced writes**: bursts of edits within a short delay collapse
//!   into a single durable write
//! - **Lifecycle flushes**: host signals (session ending, view hidden)
//!   force-flush pending edits before they can be lost
//! - **Snapshot export/import**: versioned export envelopes, validated
//!   imports that backfill defaults
//!
//! # Quick Start
//!
//! ```ignore
//! use prefsync::{EngineConfig, MemoryStore, SyncEngine};
//! use std::sync::Arc;
//!
//! let engine = SyncEngine::new(Arc::new(MemoryStore::new()), EngineConfig::load(None)?);
//! let prefs = engine.fetch(Some("user-42")).await?;
//! engine.update_one(Some("user-42"), "theme", "dark".into()).await?;
//! ```

// ─── Core engine ───────────────────────────────────────────────────
pub mod cache;
pub mod coalescer;
pub mod config;
pub mod engine;
pub mod errors;
pub mod prefs;
pub mod store;

// ─── Host integration ──────────────────────────────────────────────
pub mod lifecycle;

pub use cache::{CacheEntry, PreferenceCache, DEFAULT_CACHE_TTL};
pub use coalescer::{WriteCoalescer, DEFAULT_COALESCE_DELAY};
pub use config::EngineConfig;
pub use engine::{FlushOutcome, SyncEngine};
pub use errors::{PrefsyncError, Result};
pub use lifecycle::{LifecycleBridge, LifecycleSignal};
pub use prefs::{default_template, ExportEnvelope, Preferences, EXPORT_VERSION};
pub use store::{MemoryStore, PreferenceStore, StoreError, StoredRecord, WriteReceipt};
