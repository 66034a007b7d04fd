//! External tunnel backend interface.
//!
//! The transport itself (handshake, packet encryption, interface setup)
//! lives behind `TunnelBackend`: the engine only asks for a named tunnel
//! to come up or down and reads the backend's runtime status. A start
//! attempt resolves through the returned `Result` — the engine attaches
//! its own watchdog on top when configured.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a tunnel failed to start.
#[derive(Debug, Clone, Error)]
pub enum TunnelError {
    #[error("handshake with peer failed: {0}")]
    Handshake(String),

    #[error("tunnel configuration rejected: {0}")]
    ConfigRejected(String),

    #[error("tunnel backend unavailable: {0}")]
    Unavailable(String),

    /// Synthetic failure injected by the engine's start watchdog.
    #[error("tunnel start did not resolve within {0:?}")]
    WatchdogTimeout(Duration),
}

/// Last-handshake and traffic counters, relayed unchanged to the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelStats {
    pub last_handshake_epoch_secs: Option<u64>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Live status owned by the tunnel backend. The engine reads it to decide
/// whether a switch is a no-op; it never mutates it directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VpnRuntimeStatus {
    pub is_running: bool,
    pub active_tunnel_file: Option<String>,
    pub active_tunnel_name: Option<String>,
    /// Version of the split-tunnel app list the backend last applied.
    pub split_tunnel_version: u64,
    #[serde(default)]
    pub stats: Option<TunnelStats>,
}

/// Opaque tunnel transport the engine commands.
#[async_trait]
pub trait TunnelBackend: Send + Sync {
    /// Bring the named tunnel up. Resolves once the tunnel is established
    /// or has definitively failed; the engine waits on this (optionally
    /// bounded by its watchdog) as the only resolution signal.
    async fn start_tunnel(&self, tunnel_file: &str) -> Result<(), TunnelError>;

    /// Bring the named tunnel down. Best-effort; never fails.
    async fn stop_tunnel(&self, tunnel_file: &str);

    /// Current runtime status snapshot.
    async fn status(&self) -> VpnRuntimeStatus;
}
