//! Connectivity Observer — turns raw OS link callbacks into `NetworkState`.
//!
//! The observer is a pure filter: it drops networks without general
//! internet capability, drops VPN transports (so the engine never reacts
//! to its own tunnel), and holds back Wi-Fi callbacks that arrive before
//! the platform has an SSID for the link. It makes no decisions — every
//! surviving event is forwarded to the arbiter.

use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use super::{NetworkState, Transport};

/// Opaque identity of an OS network handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub u64);

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Raw capability snapshot the OS reports for one network handle.
#[derive(Debug, Clone)]
pub struct LinkCapabilities {
    pub transport: Transport,
    /// Whether the network has validated general internet access.
    pub internet: bool,
    /// Whether the network is itself a VPN transport.
    pub vpn: bool,
    /// SSID, when the platform delivers it (Wi-Fi only, often absent on
    /// the first callback after association).
    pub ssid: Option<String>,
    /// All IPv6 addresses currently bound to the link.
    pub ipv6_addrs: Vec<Ipv6Addr>,
}

/// One OS connectivity callback.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Capabilities(LinkId, LinkCapabilities),
    Lost(LinkId),
}

/// Filtered observation forwarded to the arbiter.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkUpdate {
    Changed(LinkId, NetworkState),
    Removed(LinkId),
}

/// Handle to the OS connectivity subsystem.
///
/// `subscribe` yields capability-changed and lost callbacks for
/// internet-capable networks; the two current-value reads are best-effort
/// synchronous queries against legacy platform APIs.
#[async_trait]
pub trait ConnectivitySource: Send + Sync {
    /// Subscribe to link events. Called once per feature-enable cycle.
    async fn subscribe(&self) -> mpsc::Receiver<LinkEvent>;

    /// Current default-route IPv4 gateway, if known.
    async fn current_gateway_ipv4(&self) -> Option<Ipv4Addr>;

    /// Current Wi-Fi SSID via the legacy connection-info API. Best-effort
    /// and permission-gated; used only for late-SSID recovery.
    async fn current_ssid(&self) -> Option<String>;
}

/// Stateful filter from `LinkEvent` to `LinkUpdate`.
pub struct ConnectivityObserver {
    /// Handles that have produced at least one forwarded state. A `Lost`
    /// for a handle we never forwarded is noise and is dropped.
    live: HashSet<LinkId>,
}

impl ConnectivityObserver {
    pub fn new() -> Self {
        Self {
            live: HashSet::new(),
        }
    }

    /// Filter one OS callback. Returns `None` when the event is not
    /// relevant to tunnel selection.
    pub fn observe(&mut self, event: LinkEvent) -> Option<LinkUpdate> {
        match event {
            LinkEvent::Capabilities(id, caps) => {
                if !caps.internet || caps.vpn {
                    trace!("{id}: ignoring non-internet or VPN transport");
                    return None;
                }
                let state = match caps.transport {
                    Transport::Wifi => {
                        let ssid = caps.ssid.filter(|s| !s.is_empty());
                        if ssid.is_none() && !self.live.contains(&id) {
                            // Provisional: a fresh Wi-Fi link with no SSID
                            // yet. A following callback carries it; the
                            // arbiter's late-SSID read covers the rest.
                            trace!("{id}: holding Wi-Fi callback without SSID");
                            return None;
                        }
                        NetworkState {
                            transport: Transport::Wifi,
                            ssid,
                            has_ipv6: has_global_ipv6(&caps.ipv6_addrs),
                        }
                    }
                    Transport::Cellular => NetworkState {
                        transport: Transport::Cellular,
                        ssid: None,
                        has_ipv6: has_global_ipv6(&caps.ipv6_addrs),
                    },
                    Transport::None => return None,
                };
                self.live.insert(id);
                Some(LinkUpdate::Changed(id, state))
            }
            LinkEvent::Lost(id) => self.live.remove(&id).then_some(LinkUpdate::Removed(id)),
        }
    }
}

impl Default for ConnectivityObserver {
    fn default() -> Self {
        Self::new()
    }
}

/// IPv6 reachability means at least one non-link-local address is bound.
fn has_global_ipv6(addrs: &[Ipv6Addr]) -> bool {
    addrs.iter().any(|a| !is_link_local(a))
}

fn is_link_local(addr: &Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}
