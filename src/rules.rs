//! Ordered tunnel-selection policy.
//!
//! Rules are evaluated top to bottom; the first enabled rule whose
//! condition matches the current network decides the target tunnel. An
//! absent or empty `tunnel_file` means "direct" — no tunnel at all.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::net::{NetworkState, Transport};

/// What a rule tests against the current network environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCondition {
    /// Wi-Fi with an SSID equal to the rule value.
    WifiSsid,
    /// Default-route IPv4 gateway equal to the rule value.
    WifiGateway,
    /// IPv6 reachability on the current network.
    Ipv6Available,
    /// Any connectivity at all.
    Ipv4Available,
}

/// One ordered policy entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRule {
    /// Stable identity across edits.
    pub id: u64,
    pub condition: RuleCondition,
    /// SSID or gateway IP; required for the SSID/gateway conditions.
    #[serde(default)]
    pub value: Option<String>,
    /// Target tunnel configuration file. `None` or empty means direct.
    #[serde(default)]
    pub tunnel_file: Option<String>,
    /// Display name of the target tunnel, for logs and the UI.
    #[serde(default)]
    pub tunnel_name: String,
    pub enabled: bool,
}

impl AgentRule {
    /// Whether this rule targets the direct (no tunnel) connection.
    pub fn is_direct(&self) -> bool {
        self.tunnel_file.as_deref().map_or(true, str::is_empty)
    }

    /// Whether the condition matches the given network environment.
    ///
    /// Disabled rules never match. Nothing matches while there is no
    /// connectivity at all.
    pub fn matches(&self, net: &NetworkState, gateway: Option<Ipv4Addr>) -> bool {
        if !self.enabled || net.is_none() {
            return false;
        }
        match self.condition {
            RuleCondition::WifiSsid => {
                net.transport == Transport::Wifi
                    && self.value.is_some()
                    && self.value.as_deref() == net.ssid.as_deref()
            }
            RuleCondition::WifiGateway => match (&self.value, gateway) {
                (Some(value), Some(gw)) => value == &gw.to_string(),
                _ => false,
            },
            RuleCondition::Ipv6Available => net.has_ipv6,
            RuleCondition::Ipv4Available => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(condition: RuleCondition, value: Option<&str>) -> AgentRule {
        AgentRule {
            id: 1,
            condition,
            value: value.map(String::from),
            tunnel_file: Some("test.conf".to_string()),
            tunnel_name: "Test".to_string(),
            enabled: true,
        }
    }

    #[test]
    fn ssid_rule_matches_exact_wifi() {
        let r = rule(RuleCondition::WifiSsid, Some("Home"));
        assert!(r.matches(&NetworkState::wifi("Home", false), None));
        assert!(!r.matches(&NetworkState::wifi("Office", false), None));
        assert!(!r.matches(&NetworkState::cellular(false), None));
    }

    #[test]
    fn ssid_rule_without_value_never_matches() {
        let r = rule(RuleCondition::WifiSsid, None);
        assert!(!r.matches(&NetworkState::wifi("Home", false), None));
    }

    #[test]
    fn gateway_rule_compares_current_gateway() {
        let r = rule(RuleCondition::WifiGateway, Some("192.168.1.1"));
        let net = NetworkState::wifi("Home", false);
        assert!(r.matches(&net, Some("192.168.1.1".parse().unwrap())));
        assert!(!r.matches(&net, Some("10.0.0.1".parse().unwrap())));
        assert!(!r.matches(&net, None));
    }

    #[test]
    fn ipv6_rule_follows_reachability() {
        let r = rule(RuleCondition::Ipv6Available, None);
        assert!(r.matches(&NetworkState::cellular(true), None));
        assert!(!r.matches(&NetworkState::cellular(false), None));
    }

    #[test]
    fn ipv4_rule_matches_any_connectivity() {
        let r = rule(RuleCondition::Ipv4Available, None);
        assert!(r.matches(&NetworkState::wifi("Anything", false), None));
        assert!(r.matches(&NetworkState::cellular(false), None));
        assert!(!r.matches(&NetworkState::none(), None));
    }

    #[test]
    fn disabled_rule_never_matches() {
        let mut r = rule(RuleCondition::Ipv4Available, None);
        r.enabled = false;
        assert!(!r.matches(&NetworkState::cellular(false), None));
    }

    #[test]
    fn direct_target_detection() {
        let mut r = rule(RuleCondition::Ipv4Available, None);
        assert!(!r.is_direct());
        r.tunnel_file = Some(String::new());
        assert!(r.is_direct());
        r.tunnel_file = None;
        assert!(r.is_direct());
    }

    #[test]
    fn rule_roundtrips_through_json() {
        let r = rule(RuleCondition::WifiSsid, Some("Home"));
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("wifi_ssid"));
        let back: AgentRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
