use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{PrefsyncError, Result};

/// Tuning knobs for the sync engine.
///
/// The defaults encode the intended trade-offs: a five-minute cache TTL keeps
/// remote reads rare, and a one-second coalescing delay batches bursts of
/// edits into a single durable write at the cost of an at-most-one-second
/// durability lag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_coalesce_delay_ms")]
    pub coalesce_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            coalesce_delay_ms: default_coalesce_delay_ms(),
        }
    }
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_coalesce_delay_ms() -> u64 {
    1000
}

impl EngineConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn coalesce_delay(&self) -> Duration {
        Duration::from_millis(self.coalesce_delay_ms)
    }

    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::load_inner(path).map_err(|err| PrefsyncError::Config(format!("{err:#}")))
    }

    fn load_inner(path: Option<&str>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config from {}", p))?;
                toml::from_str(&content).context("Failed to parse config")
            }
            None => {
                // Try default locations
                let default_paths = ["prefsync.toml", "~/.config/prefsync/config.toml"];
                for p in &default_paths {
                    if let Ok(content) = std::fs::read_to_string(p) {
                        return toml::from_str(&content).context("Failed to parse config");
                    }
                }
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}
