//! Network Arbiter — one authoritative `NetworkState` under debounce.
//!
//! Tracks every live link's last known state and resolves a single "best"
//! network (Wi-Fi preferred over cellular). Commitment is debounced: each
//! qualifying event restarts the window, so a burst of capability
//! callbacks during Wi-Fi association collapses into one committed state.
//! A committed state that is logically equal to the previous commit is
//! suppressed entirely.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::observer::{ConnectivityObserver, ConnectivitySource, LinkId, LinkUpdate};
use super::{NetworkState, Transport};

pub struct NetworkArbiter {
    /// Live links in arrival order; arbitration picks the first match.
    links: Vec<(LinkId, NetworkState)>,
    last_committed: Option<NetworkState>,
}

impl NetworkArbiter {
    pub fn new() -> Self {
        Self {
            links: Vec::new(),
            last_committed: None,
        }
    }

    /// Fold one filtered observation into the live-link map.
    pub fn apply(&mut self, update: LinkUpdate) {
        match update {
            LinkUpdate::Changed(id, mut state) => {
                if let Some((_, prev)) = self.links.iter().find(|(lid, _)| *lid == id) {
                    // Transient-SSID-loss smoothing: a Wi-Fi callback that
                    // dropped the SSID keeps the last one known for the link.
                    if state.transport == Transport::Wifi
                        && state.ssid.is_none()
                        && prev.transport == Transport::Wifi
                    {
                        state.ssid = prev.ssid.clone();
                    }
                }
                match self.links.iter_mut().find(|(lid, _)| *lid == id) {
                    Some(entry) => entry.1 = state,
                    None => self.links.push((id, state)),
                }
            }
            LinkUpdate::Removed(id) => self.links.retain(|(lid, _)| *lid != id),
        }
    }

    /// Resolve the single best network: first Wi-Fi, else first cellular,
    /// else no connectivity.
    pub fn arbitrate(&self) -> NetworkState {
        for (_, state) in &self.links {
            if state.transport == Transport::Wifi {
                return state.clone();
            }
        }
        for (_, state) in &self.links {
            if state.transport == Transport::Cellular {
                return state.clone();
            }
        }
        NetworkState::none()
    }

    /// Drive the arbiter until cancellation: consume link events from
    /// `source`, debounce, and send committed states to `commit_tx`.
    ///
    /// Late-SSID recovery: when the arbitrated state after the window is
    /// Wi-Fi with no SSID, one fallback read of the legacy connection-info
    /// API is attempted before committing.
    pub async fn run(
        mut self,
        source: Arc<dyn ConnectivitySource>,
        commit_tx: mpsc::Sender<NetworkState>,
        debounce: Duration,
        cancel: CancellationToken,
    ) {
        let mut events = source.subscribe().await;
        let mut observer = ConnectivityObserver::new();
        let mut deadline: Option<Instant> = None;

        loop {
            let window = async move {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("arbiter loop cancelled");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("connectivity event stream closed");
                        break;
                    };
                    if let Some(update) = observer.observe(event) {
                        trace!("link update: {update:?}");
                        self.apply(update);
                        // Every qualifying event restarts the window.
                        deadline = Some(Instant::now() + debounce);
                    }
                }
                _ = window => {
                    deadline = None;
                    let mut state = self.arbitrate();
                    if state.transport == Transport::Wifi
                        && state.ssid.as_deref().unwrap_or("").is_empty()
                    {
                        if let Some(ssid) = source.current_ssid().await {
                            debug!("late SSID recovery: {ssid:?}");
                            state.ssid = Some(ssid);
                        }
                    }
                    if self.last_committed.as_ref() == Some(&state) {
                        trace!("suppressing logically equal commit");
                        continue;
                    }
                    debug!("committing network state: {state:?}");
                    self.last_committed = Some(state.clone());
                    if commit_tx.send(state).await.is_err() {
                        warn!("commit receiver dropped, stopping arbiter");
                        break;
                    }
                }
            }
        }
    }
}

impl Default for NetworkArbiter {
    fn default() -> Self {
        Self::new()
    }
}
