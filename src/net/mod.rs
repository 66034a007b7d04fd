//! Network environment model.
//!
//! `NetworkState` is the immutable snapshot the rest of the engine reasons
//! about: transport kind, SSID (Wi-Fi only), and IPv6 reachability. Logical
//! equality over these three fields is what deduplicates noisy OS
//! capability callbacks (signal-strength-only changes compare equal).

pub mod arbiter;
pub mod observer;

pub use arbiter::NetworkArbiter;
pub use observer::{ConnectivityObserver, ConnectivitySource};

use serde::{Deserialize, Serialize};

/// Transport class of a network, as far as tunnel selection cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Wifi,
    Cellular,
    /// No internet-capable network available.
    None,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wifi => write!(f, "wifi"),
            Self::Cellular => write!(f, "cell"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Immutable snapshot of the arbitrated network environment.
///
/// `PartialEq` is the engine's "logical equality": two snapshots are the
/// same environment iff transport, SSID, and IPv6 reachability all match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub transport: Transport,
    /// Only meaningful for `Transport::Wifi`; `None` when the OS has not
    /// yet delivered an SSID-bearing callback.
    pub ssid: Option<String>,
    pub has_ipv6: bool,
}

impl NetworkState {
    /// The no-connectivity state.
    pub fn none() -> Self {
        Self {
            transport: Transport::None,
            ssid: None,
            has_ipv6: false,
        }
    }

    pub fn wifi(ssid: impl Into<String>, has_ipv6: bool) -> Self {
        Self {
            transport: Transport::Wifi,
            ssid: Some(ssid.into()),
            has_ipv6,
        }
    }

    pub fn cellular(has_ipv6: bool) -> Self {
        Self {
            transport: Transport::Cellular,
            ssid: None,
            has_ipv6,
        }
    }

    pub fn is_none(&self) -> bool {
        self.transport == Transport::None
    }

    /// Coarse environment identity: `"{transport}_{ssid}"`.
    ///
    /// Used solely to decide whether a transition is "new enough" to clear
    /// the failure blacklist. Link-property jitter (IPv6 flapping) does not
    /// change the fingerprint.
    pub fn fingerprint(&self) -> String {
        format!("{}_{}", self.transport, self.ssid.as_deref().unwrap_or(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_equality_over_three_fields() {
        let a = NetworkState::wifi("Home", true);
        let b = NetworkState::wifi("Home", true);
        assert_eq!(a, b);

        assert_ne!(a, NetworkState::wifi("Home", false));
        assert_ne!(a, NetworkState::wifi("Office", true));
        assert_ne!(a, NetworkState::cellular(true));
    }

    #[test]
    fn fingerprint_ignores_ipv6() {
        let with_v6 = NetworkState::wifi("Home", true);
        let without_v6 = NetworkState::wifi("Home", false);
        assert_eq!(with_v6.fingerprint(), without_v6.fingerprint());
        assert_eq!(with_v6.fingerprint(), "wifi_Home");
    }

    #[test]
    fn fingerprint_distinguishes_ssid_and_transport() {
        assert_ne!(
            NetworkState::wifi("Home", false).fingerprint(),
            NetworkState::wifi("Office", false).fingerprint()
        );
        assert_ne!(
            NetworkState::wifi("Home", false).fingerprint(),
            NetworkState::cellular(false).fingerprint()
        );
        assert_eq!(NetworkState::none().fingerprint(), "none_");
    }

    #[test]
    fn none_state_shape() {
        let none = NetworkState::none();
        assert!(none.is_none());
        assert_eq!(none.ssid, None);
        assert!(!none.has_ipv6);
    }
}
