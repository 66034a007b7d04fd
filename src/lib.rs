//! wgpilot — network-aware WireGuard tunnel selection engine.
//!
//! Observes the device's network environment (Wi-Fi SSID, gateway, IPv6
//! reachability), matches it against an ordered rule list, and drives an
//! external tunnel backend: bringing the matching tunnel up, blacklisting
//! tunnels that fail to start and falling back to the next candidate, and
//! dropping to a direct connection when no rule applies.
//!
//! The OS connectivity subsystem, the tunnel transport, and the
//! configuration store are consumed through traits (`ConnectivitySource`,
//! `TunnelBackend`, `ConfigStore`) so the engine is portable and testable
//! with in-process fakes.

pub mod backend;
pub mod config;
pub mod engine;
pub mod net;
pub mod rules;
pub mod store;

pub use backend::{TunnelBackend, TunnelError, TunnelStats, VpnRuntimeStatus};
pub use config::EngineConfig;
pub use engine::evaluator::{Decision, Trigger};
pub use engine::{EngineStatus, SelectionEngine, UserNotice};
pub use net::observer::{
    ConnectivityObserver, ConnectivitySource, LinkCapabilities, LinkEvent, LinkId, LinkUpdate,
};
pub use net::{NetworkState, Transport};
pub use rules::{AgentRule, RuleCondition};
pub use store::{ConfigStore, LogEvent, LogKind, MemoryConfigStore, TunnelEntry};
