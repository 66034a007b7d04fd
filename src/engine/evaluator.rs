//! Rule Evaluator — the pure decision core.
//!
//! `plan` maps a consistent snapshot of the world onto one of three
//! decisions: do nothing, stop the running tunnel (go direct), or start a
//! named tunnel. It performs no I/O and holds no locks, which is what
//! makes the decision table exhaustively testable.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::backend::VpnRuntimeStatus;
use crate::net::NetworkState;
use crate::rules::AgentRule;
use crate::store::TunnelEntry;

/// What caused an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// The feature was just enabled (or the app started while enabled).
    Enabled,
    /// The arbiter committed a new network state.
    NetworkChanged,
    /// The rule list was edited.
    RulesChanged,
    /// A prior tunnel start failed; the next candidate must be attempted.
    TunnelError,
    /// The split-tunnel app list changed while a tunnel is running.
    SplitTunnelChanged,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Enabled => "enabled",
            Self::NetworkChanged => "network-changed",
            Self::RulesChanged => "rules-changed",
            Self::TunnelError => "tunnel-error",
            Self::SplitTunnelChanged => "split-tunnel-changed",
        };
        write!(f, "{s}")
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The resolved target already matches the live state.
    Stay,
    /// Stop the running tunnel; traffic flows direct.
    Stop { tunnel_file: String },
    /// Bring the named tunnel up.
    Start {
        tunnel_file: String,
        tunnel_name: String,
    },
}

/// Everything `plan` is allowed to look at.
pub struct EvalInput<'a> {
    pub rules_enabled: bool,
    pub network: Option<&'a NetworkState>,
    pub rules: &'a [AgentRule],
    pub blacklist: &'a HashSet<String>,
    pub gateway: Option<Ipv4Addr>,
    pub status: &'a VpnRuntimeStatus,
    pub known_tunnels: &'a [TunnelEntry],
    pub desired_split_version: u64,
    pub trigger: Trigger,
}

/// Resolve the target tunnel for the current environment and decide
/// whether a switch is required.
pub fn plan(input: &EvalInput<'_>) -> Decision {
    if !input.rules_enabled {
        return Decision::Stay;
    }

    let network = match input.network {
        Some(n) if !n.is_none() => n,
        // Committed total network loss: stop whatever is running.
        Some(_) => return stop_if_running(input.status),
        // No network observed yet (fresh enable, arbiter still
        // debouncing): leave the world alone until the first commit.
        None => return Decision::Stay,
    };

    // First match wins, skipping blacklisted and dangling targets. A
    // direct target is never blacklisted and always eligible.
    let mut target: Option<&AgentRule> = None;
    for rule in input.rules {
        if !rule.matches(network, input.gateway) {
            continue;
        }
        if rule.is_direct() {
            target = Some(rule);
            break;
        }
        let file = rule.tunnel_file.as_deref().unwrap_or_default();
        if input.blacklist.contains(file) {
            continue;
        }
        // A rule referencing a tunnel that no longer exists is a
        // non-match, never an error.
        if !input.known_tunnels.iter().any(|t| t.file == file) {
            continue;
        }
        target = Some(rule);
        break;
    }

    match target {
        Some(rule) if !rule.is_direct() => {
            let file = rule.tunnel_file.clone().unwrap_or_default();
            let active = input
                .status
                .is_running
                .then_some(input.status.active_tunnel_file.as_deref())
                .flatten();
            let split_mismatch = input.status.is_running
                && input.status.split_tunnel_version != input.desired_split_version;
            let needs_switch = active != Some(file.as_str())
                || input.trigger == Trigger::TunnelError
                || split_mismatch;
            if needs_switch {
                Decision::Start {
                    tunnel_file: file,
                    tunnel_name: rule.tunnel_name.clone(),
                }
            } else {
                Decision::Stay
            }
        }
        // No qualifying rule, or an explicit direct rule: same effect.
        _ => stop_if_running(input.status),
    }
}

fn stop_if_running(status: &VpnRuntimeStatus) -> Decision {
    if status.is_running {
        Decision::Stop {
            tunnel_file: status.active_tunnel_file.clone().unwrap_or_default(),
        }
    } else {
        Decision::Stay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleCondition;

    fn rule(id: u64, condition: RuleCondition, value: Option<&str>, tunnel: Option<&str>) -> AgentRule {
        AgentRule {
            id,
            condition,
            value: value.map(String::from),
            tunnel_file: tunnel.map(String::from),
            tunnel_name: tunnel.unwrap_or("direct").to_string(),
            enabled: true,
        }
    }

    fn tunnels(files: &[&str]) -> Vec<TunnelEntry> {
        files
            .iter()
            .map(|f| TunnelEntry {
                file: f.to_string(),
                display_name: f.to_string(),
            })
            .collect()
    }

    fn running(file: &str) -> VpnRuntimeStatus {
        VpnRuntimeStatus {
            is_running: true,
            active_tunnel_file: Some(file.to_string()),
            active_tunnel_name: Some(file.to_string()),
            split_tunnel_version: 0,
            stats: None,
        }
    }

    struct Fixture {
        rules: Vec<AgentRule>,
        blacklist: HashSet<String>,
        network: Option<NetworkState>,
        status: VpnRuntimeStatus,
        known: Vec<TunnelEntry>,
        trigger: Trigger,
        desired_split_version: u64,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                rules: vec![
                    rule(1, RuleCondition::WifiSsid, Some("Home"), Some("home.conf")),
                    rule(2, RuleCondition::Ipv4Available, None, Some("fallback.conf")),
                ],
                blacklist: HashSet::new(),
                network: Some(NetworkState::wifi("Home", false)),
                status: VpnRuntimeStatus::default(),
                known: tunnels(&["home.conf", "fallback.conf"]),
                trigger: Trigger::NetworkChanged,
                desired_split_version: 0,
            }
        }

        fn plan(&self) -> Decision {
            plan(&EvalInput {
                rules_enabled: true,
                network: self.network.as_ref(),
                rules: &self.rules,
                blacklist: &self.blacklist,
                gateway: None,
                status: &self.status,
                known_tunnels: &self.known,
                desired_split_version: self.desired_split_version,
                trigger: self.trigger,
            })
        }
    }

    #[test]
    fn disabled_is_a_noop() {
        let f = Fixture::new();
        let decision = plan(&EvalInput {
            rules_enabled: false,
            network: f.network.as_ref(),
            rules: &f.rules,
            blacklist: &f.blacklist,
            gateway: None,
            status: &running("home.conf"),
            known_tunnels: &f.known,
            desired_split_version: 0,
            trigger: Trigger::NetworkChanged,
        });
        assert_eq!(decision, Decision::Stay);
    }

    #[test]
    fn first_matching_rule_wins() {
        let f = Fixture::new();
        assert_eq!(
            f.plan(),
            Decision::Start {
                tunnel_file: "home.conf".into(),
                tunnel_name: "home.conf".into(),
            }
        );
    }

    #[test]
    fn non_matching_first_rule_falls_through() {
        let mut f = Fixture::new();
        f.network = Some(NetworkState::wifi("Office", false));
        match f.plan() {
            Decision::Start { tunnel_file, .. } => assert_eq!(tunnel_file, "fallback.conf"),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn blacklisted_target_is_skipped() {
        let mut f = Fixture::new();
        f.blacklist.insert("home.conf".to_string());
        match f.plan() {
            Decision::Start { tunnel_file, .. } => assert_eq!(tunnel_file, "fallback.conf"),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn all_targets_blacklisted_resolves_direct() {
        let mut f = Fixture::new();
        f.blacklist.insert("home.conf".to_string());
        f.blacklist.insert("fallback.conf".to_string());
        f.status = running("home.conf");
        assert_eq!(
            f.plan(),
            Decision::Stop {
                tunnel_file: "home.conf".into()
            }
        );
    }

    #[test]
    fn all_targets_blacklisted_nothing_running_stays() {
        let mut f = Fixture::new();
        f.blacklist.insert("home.conf".to_string());
        f.blacklist.insert("fallback.conf".to_string());
        assert_eq!(f.plan(), Decision::Stay);
    }

    #[test]
    fn dangling_tunnel_reference_is_a_non_match() {
        let mut f = Fixture::new();
        f.known = tunnels(&["fallback.conf"]);
        match f.plan() {
            Decision::Start { tunnel_file, .. } => assert_eq!(tunnel_file, "fallback.conf"),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn explicit_direct_rule_stops_running_tunnel() {
        let mut f = Fixture::new();
        f.rules.insert(0, rule(0, RuleCondition::WifiSsid, Some("Home"), None));
        f.status = running("fallback.conf");
        assert_eq!(
            f.plan(),
            Decision::Stop {
                tunnel_file: "fallback.conf".into()
            }
        );
    }

    #[test]
    fn network_loss_stops_running_tunnel() {
        let mut f = Fixture::new();
        f.network = Some(NetworkState::none());
        f.status = running("home.conf");
        assert_eq!(
            f.plan(),
            Decision::Stop {
                tunnel_file: "home.conf".into()
            }
        );
    }

    #[test]
    fn network_loss_with_nothing_running_stays() {
        let mut f = Fixture::new();
        f.network = Some(NetworkState::none());
        assert_eq!(f.plan(), Decision::Stay);
    }

    #[test]
    fn unobserved_network_keeps_running_tunnel() {
        // Right after enable the arbiter has committed nothing yet; that
        // is not a loss observation and must not stop anything.
        let mut f = Fixture::new();
        f.network = None;
        f.status = running("home.conf");
        f.trigger = Trigger::Enabled;
        assert_eq!(f.plan(), Decision::Stay);
    }

    #[test]
    fn matching_target_already_active_stays() {
        let mut f = Fixture::new();
        f.status = running("home.conf");
        assert_eq!(f.plan(), Decision::Stay);
    }

    #[test]
    fn tunnel_error_trigger_forces_reattempt() {
        let mut f = Fixture::new();
        f.status = running("home.conf");
        f.trigger = Trigger::TunnelError;
        match f.plan() {
            Decision::Start { tunnel_file, .. } => assert_eq!(tunnel_file, "home.conf"),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn split_tunnel_version_mismatch_restarts_active() {
        let mut f = Fixture::new();
        f.status = running("home.conf");
        f.desired_split_version = 2;
        match f.plan() {
            Decision::Start { tunnel_file, .. } => assert_eq!(tunnel_file, "home.conf"),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn split_tunnel_mismatch_ignored_when_stopped() {
        let mut f = Fixture::new();
        f.desired_split_version = 2;
        f.blacklist.insert("home.conf".to_string());
        f.blacklist.insert("fallback.conf".to_string());
        assert_eq!(f.plan(), Decision::Stay);
    }

    #[test]
    fn gateway_rule_selected_with_matching_gateway() {
        let mut f = Fixture::new();
        f.rules = vec![rule(
            1,
            RuleCondition::WifiGateway,
            Some("192.168.1.1"),
            Some("home.conf"),
        )];
        let decision = plan(&EvalInput {
            rules_enabled: true,
            network: f.network.as_ref(),
            rules: &f.rules,
            blacklist: &f.blacklist,
            gateway: Some("192.168.1.1".parse().unwrap()),
            status: &f.status,
            known_tunnels: &f.known,
            desired_split_version: 0,
            trigger: Trigger::NetworkChanged,
        });
        match decision {
            Decision::Start { tunnel_file, .. } => assert_eq!(tunnel_file, "home.conf"),
            other => panic!("unexpected decision: {other:?}"),
        }
    }
}
