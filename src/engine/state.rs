//! Runtime State Store — the engine's single mutable root.
//!
//! Every field lives behind one mutex; evaluation takes a consistent
//! snapshot under the same lock so a decision never observes a state that
//! changes mid-computation. The blacklist is scoped to the current
//! environment fingerprint: it survives link-property jitter (IPv6
//! flapping) and is cleared on genuine environment changes, rule edits,
//! enable transitions, and manual intervention.

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::debug;

use crate::net::NetworkState;
use crate::rules::AgentRule;

/// The tunnel file the engine most recently asked the backend to start.
/// The generation ties an internal start attempt (and its watchdog) to
/// the intent it was spawned for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingIntent {
    pub tunnel_file: String,
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeState {
    pub rules_enabled: bool,
    pub current_network: Option<NetworkState>,
    pub pending_intent: Option<PendingIntent>,
    pub blacklist: HashSet<String>,
    pub rules: Vec<AgentRule>,
}

impl RuntimeState {
    fn disabled() -> Self {
        Self {
            rules_enabled: false,
            current_network: None,
            pending_intent: None,
            blacklist: HashSet::new(),
            rules: Vec::new(),
        }
    }
}

/// Single-writer atomic owner of `RuntimeState`.
pub(crate) struct StateStore {
    inner: Mutex<RuntimeState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RuntimeState::disabled()),
        }
    }

    pub fn snapshot(&self) -> RuntimeState {
        self.inner.lock().clone()
    }

    pub fn enabled(&self) -> bool {
        self.inner.lock().rules_enabled
    }

    /// Enable transition (or re-enable on app start): full reset.
    pub fn on_enabled(&self, rules: Vec<AgentRule>) {
        let mut state = self.inner.lock();
        *state = RuntimeState::disabled();
        state.rules_enabled = true;
        state.rules = rules;
    }

    /// Disable transition: back to the empty, disabled state.
    pub fn on_disabled(&self) {
        *self.inner.lock() = RuntimeState::disabled();
    }

    /// Rule list edited while enabled: stale failures may no longer apply,
    /// so the blacklist goes, but the known network is preserved.
    pub fn on_rules_changed(&self, rules: Vec<AgentRule>) {
        let mut state = self.inner.lock();
        state.rules = rules;
        state.blacklist.clear();
    }

    /// Replace the current network. Clears the blacklist only when the
    /// environment fingerprint actually changed and the new state has
    /// connectivity; pure link jitter keeps failure history intact.
    /// Returns whether the fingerprint changed.
    pub fn on_environment_changed(&self, network: NetworkState) -> bool {
        let mut state = self.inner.lock();
        let changed = state
            .current_network
            .as_ref()
            .map_or(true, |prev| prev.fingerprint() != network.fingerprint());
        if changed && !network.is_none() {
            if !state.blacklist.is_empty() {
                debug!("environment fingerprint changed, clearing blacklist");
            }
            state.blacklist.clear();
        }
        state.current_network = Some(network);
        changed
    }

    /// Record a new outstanding start intent, superseding any previous one.
    pub fn set_pending_intent(&self, tunnel_file: &str, generation: u64) {
        self.inner.lock().pending_intent = Some(PendingIntent {
            tunnel_file: tunnel_file.to_string(),
            generation,
        });
    }

    /// Clear the intent unconditionally (stop path).
    pub fn clear_pending_intent(&self) {
        self.inner.lock().pending_intent = None;
    }

    /// Clear the intent only if it still belongs to the given attempt.
    pub fn complete_intent(&self, tunnel_file: &str, generation: u64) {
        let mut state = self.inner.lock();
        if state.pending_intent.as_ref().is_some_and(|p| {
            p.tunnel_file == tunnel_file && p.generation == generation
        }) {
            state.pending_intent = None;
        }
    }

    /// Atomic stale-failure guard: blacklist the failed tunnel and clear
    /// the intent only when the failure still corresponds to the current
    /// intent. Returns `false` for stale failures, which must have no
    /// effect whatsoever.
    pub fn record_failure(&self, failed_file: &str, generation: Option<u64>) -> bool {
        let mut state = self.inner.lock();
        let current = match &state.pending_intent {
            Some(p)
                if p.tunnel_file == failed_file
                    && generation.map_or(true, |g| g == p.generation) =>
            {
                true
            }
            _ => false,
        };
        if !current {
            return false;
        }
        state.pending_intent = None;
        state.blacklist.insert(failed_file.to_string());
        true
    }

    /// Manual intent overrides automatic fallback history.
    pub fn clear_blacklist_and_intent(&self) {
        let mut state = self.inner.lock();
        state.blacklist.clear();
        state.pending_intent = None;
    }
}
