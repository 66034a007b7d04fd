//! Engine configuration.
//!
//! Loaded from a `wgpilot.toml` file when present; every field has a
//! sensible default so a missing file means default behavior, not an
//! error.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Debounce window for connectivity-event bursts, in milliseconds.
    pub debounce_ms: u64,
    /// Bound on a tunnel-start attempt before a synthetic watchdog
    /// failure is injected. `0` disables the watchdog (wait forever).
    pub start_watchdog_secs: u64,
    /// Log retention cap for the embedded store.
    pub log_retention: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 400,
            start_watchdog_secs: 30,
            log_retention: 200,
        }
    }
}

impl EngineConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn start_watchdog(&self) -> Option<Duration> {
        (self.start_watchdog_secs > 0).then(|| Duration::from_secs(self.start_watchdog_secs))
    }

    /// Load config from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        toml::from_str(&content)
            .with_context(|| format!("failed to parse {} as TOML", path.display()))
    }
}
