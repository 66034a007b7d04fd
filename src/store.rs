//! Configuration store interface and structured log events.
//!
//! The engine consumes rules reactively, resolves tunnel files against the
//! store's current tunnel list, and appends an ordered, wall-clock-stamped
//! log event for every transition it evaluates. Retention (pruning past a
//! fixed count) is the store's concern, not the engine's.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::rules::AgentRule;

/// One tunnel configuration known to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelEntry {
    pub file: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// A rule evaluation concluded (whether or not a switch happened).
    Transition,
    /// All connectivity was lost.
    NetworkLost,
    /// A tunnel failed to start and was blacklisted.
    TunnelError,
    /// A user-initiated start or stop bypassed rule matching.
    Manual,
}

/// Structured, append-only log event describing one engine decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub at: DateTime<Utc>,
    pub kind: LogKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_tunnel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_tunnel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LogEvent {
    pub fn new(kind: LogKind) -> Self {
        Self {
            at: Utc::now(),
            kind,
            from_tunnel: None,
            to_tunnel: None,
            ssid: None,
            detail: None,
        }
    }

    pub fn from_tunnel(mut self, file: impl Into<String>) -> Self {
        self.from_tunnel = Some(file.into());
        self
    }

    pub fn to_tunnel(mut self, file: impl Into<String>) -> Self {
        self.to_tunnel = Some(file.into());
        self
    }

    pub fn ssid(mut self, ssid: impl Into<String>) -> Self {
        self.ssid = Some(ssid.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Reactive configuration store the engine reads and logs through.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Watch the ordered rule list. The engine re-evaluates on every
    /// emission and clears its failure blacklist (stale failures may no
    /// longer apply to the edited rules).
    fn observe_rules(&self) -> watch::Receiver<Vec<AgentRule>>;

    /// Tunnels currently present in the store. A rule referencing a file
    /// not in this list is treated as a non-match.
    async fn current_tunnels(&self) -> Vec<TunnelEntry>;

    /// Version of the desired split-tunnel app list. Compared against
    /// `VpnRuntimeStatus::split_tunnel_version` during evaluation.
    async fn split_tunnel_version(&self) -> u64;

    /// Append one structured log event, pruning past the retention cap.
    async fn append_log(&self, event: LogEvent);
}

/// In-memory store with a bounded log ring. Backs the integration suite
/// and serves as the embedded default for hosts without persistence.
pub struct MemoryConfigStore {
    rules_tx: watch::Sender<Vec<AgentRule>>,
    tunnels: Mutex<Vec<TunnelEntry>>,
    split_version: Mutex<u64>,
    log: Mutex<VecDeque<LogEvent>>,
    retention: usize,
}

impl MemoryConfigStore {
    pub fn new(retention: usize) -> Self {
        let (rules_tx, _) = watch::channel(Vec::new());
        Self {
            rules_tx,
            tunnels: Mutex::new(Vec::new()),
            split_version: Mutex::new(0),
            log: Mutex::new(VecDeque::new()),
            retention,
        }
    }

    pub fn set_rules(&self, rules: Vec<AgentRule>) {
        // send_replace so the value updates even with no live subscriber.
        self.rules_tx.send_replace(rules);
    }

    pub fn set_tunnels(&self, tunnels: Vec<TunnelEntry>) {
        *self.tunnels.lock() = tunnels;
    }

    pub fn set_split_tunnel_version(&self, version: u64) {
        *self.split_version.lock() = version;
    }

    /// Snapshot of the current log ring, oldest first.
    pub fn log_snapshot(&self) -> Vec<LogEvent> {
        self.log.lock().iter().cloned().collect()
    }
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new(200)
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    fn observe_rules(&self) -> watch::Receiver<Vec<AgentRule>> {
        self.rules_tx.subscribe()
    }

    async fn current_tunnels(&self) -> Vec<TunnelEntry> {
        self.tunnels.lock().clone()
    }

    async fn split_tunnel_version(&self) -> u64 {
        *self.split_version.lock()
    }

    async fn append_log(&self, event: LogEvent) {
        let mut log = self.log.lock();
        log.push_back(event);
        while log.len() > self.retention {
            log.pop_front();
        }
    }
}
