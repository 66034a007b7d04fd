//! SelectionEngine — orchestration, evaluation loop, status broadcast.
//!
//! One engine instance owns the runtime state and three background loops
//! (network arbitration, rule watching, evaluation), all stopped through
//! a single `CancellationToken` per enable cycle. Evaluation requests are
//! serialized onto a bounded channel; the loop drains queued triggers and
//! acts only on the newest, so a superseded request never applies a stale
//! conclusion. Backend start attempts run in their own task and are tied
//! to the intent generation they were spawned for.

pub mod evaluator;
mod fallback;
mod state;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{TunnelBackend, TunnelError, VpnRuntimeStatus};
use crate::config::EngineConfig;
use crate::net::arbiter::NetworkArbiter;
use crate::net::observer::ConnectivitySource;
use crate::net::NetworkState;
use crate::rules::AgentRule;
use crate::store::{ConfigStore, LogEvent, LogKind};

use evaluator::{Decision, EvalInput, Trigger};
use state::StateStore;

/// Capacity of the evaluation request channel. Requests coalesce, so a
/// small bound is plenty.
const EVAL_QUEUE_CAPACITY: usize = 16;

/// Transient user-facing message (tunnel failure surfaced once).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserNotice {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Snapshot broadcast to the UI layer on every engine transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStatus {
    pub enabled: bool,
    pub network: Option<NetworkState>,
    /// Backend status, relayed unchanged (incl. handshake/traffic stats).
    pub vpn: VpnRuntimeStatus,
    pub notice: Option<UserNotice>,
}

/// The network-aware tunnel selection engine.
///
/// Cheap to clone; all clones share one state root.
#[derive(Clone)]
pub struct SelectionEngine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    backend: Arc<dyn TunnelBackend>,
    store: Arc<dyn ConfigStore>,
    source: Arc<dyn ConnectivitySource>,
    config: EngineConfig,
    state: StateStore,
    /// Present only while enabled; dropping it stops the eval loop.
    eval_tx: Mutex<Option<mpsc::Sender<Trigger>>>,
    run_cancel: Mutex<Option<CancellationToken>>,
    status_tx: watch::Sender<EngineStatus>,
    /// Monotonic start-attempt counter, ties watchdogs to their intent.
    generation: AtomicU64,
}

impl SelectionEngine {
    pub fn new(
        backend: Arc<dyn TunnelBackend>,
        store: Arc<dyn ConfigStore>,
        source: Arc<dyn ConnectivitySource>,
        config: EngineConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(EngineStatus::default());
        Self {
            inner: Arc::new(EngineInner {
                backend,
                store,
                source,
                config,
                state: StateStore::new(),
                eval_tx: Mutex::new(None),
                run_cancel: Mutex::new(None),
                status_tx,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Observe engine status transitions (connection state, active tunnel,
    /// transient notices).
    pub fn status_rx(&self) -> watch::Receiver<EngineStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Status transitions as a continuous stream, for UI layers that
    /// consume streams rather than watch channels.
    pub fn status_stream(&self) -> WatchStream<EngineStatus> {
        WatchStream::new(self.inner.status_tx.subscribe())
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.state.enabled()
    }

    /// Enable automatic selection. Also the app-start path while already
    /// enabled: always a full reset of network, blacklist, and intent,
    /// followed by a fresh connectivity subscription.
    pub async fn enable(&self) {
        let inner = &self.inner;
        if let Some(token) = inner.run_cancel.lock().take() {
            token.cancel();
        }

        let rules_rx = inner.store.observe_rules();
        let rules = rules_rx.borrow().clone();
        inner.state.on_enabled(rules);

        let cancel = CancellationToken::new();
        *inner.run_cancel.lock() = Some(cancel.clone());
        let (eval_tx, eval_rx) = mpsc::channel(EVAL_QUEUE_CAPACITY);
        *inner.eval_tx.lock() = Some(eval_tx);

        tokio::spawn(eval_loop(Arc::clone(inner), eval_rx, cancel.clone()));
        tokio::spawn(network_loop(Arc::clone(inner), cancel.clone()));
        tokio::spawn(rules_loop(Arc::clone(inner), rules_rx, cancel));

        info!("tunnel selection enabled");
        inner.request_eval(Trigger::Enabled).await;
        inner.broadcast(None).await;
    }

    /// Disable automatic selection: stop the connectivity subscription and
    /// reset to the disabled, empty state. A running tunnel is left alone.
    pub async fn disable(&self) {
        let inner = &self.inner;
        if let Some(token) = inner.run_cancel.lock().take() {
            token.cancel();
        }
        *inner.eval_tx.lock() = None;
        inner.state.on_disabled();
        info!("tunnel selection disabled");
        inner.broadcast(None).await;
    }

    /// The split-tunnel app list changed; re-evaluate so a running tunnel
    /// picks up the new version.
    pub async fn notify_split_tunnel_changed(&self) {
        self.inner.request_eval(Trigger::SplitTunnelChanged).await;
    }
}

impl EngineInner {
    pub(crate) async fn request_eval(&self, trigger: Trigger) {
        let tx = self.eval_tx.lock().clone();
        if let Some(tx) = tx {
            if tx.send(trigger).await.is_err() {
                warn!("evaluation loop gone, dropping trigger {trigger}");
            }
        }
    }

    pub(crate) async fn broadcast(&self, notice: Option<UserNotice>) {
        let vpn = self.backend.status().await;
        let snap = self.state.snapshot();
        self.status_tx.send_replace(EngineStatus {
            enabled: snap.rules_enabled,
            network: snap.current_network,
            vpn,
            notice,
        });
    }

    /// One serialized evaluation pass: snapshot, plan, act, log.
    async fn evaluate(self: Arc<Self>, trigger: Trigger) {
        let snap = self.state.snapshot();
        if !snap.rules_enabled {
            return;
        }
        let status = self.backend.status().await;
        let gateway = self.source.current_gateway_ipv4().await;
        let known_tunnels = self.store.current_tunnels().await;
        let desired_split_version = self.store.split_tunnel_version().await;

        let decision = evaluator::plan(&EvalInput {
            rules_enabled: snap.rules_enabled,
            network: snap.current_network.as_ref(),
            rules: &snap.rules,
            blacklist: &snap.blacklist,
            gateway,
            status: &status,
            known_tunnels: &known_tunnels,
            desired_split_version,
            trigger,
        });

        self.log_decision(&snap.current_network, &status, trigger, &decision)
            .await;

        match decision {
            Decision::Stay => {
                debug!("evaluation ({trigger}): no switch needed");
            }
            Decision::Stop { tunnel_file } => {
                info!("evaluation ({trigger}): stopping {tunnel_file}, going direct");
                self.state.clear_pending_intent();
                self.backend.stop_tunnel(&tunnel_file).await;
            }
            Decision::Start {
                tunnel_file,
                tunnel_name,
            } => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                info!("evaluation ({trigger}): starting {tunnel_file} ({tunnel_name})");
                self.state.set_pending_intent(&tunnel_file, generation);
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    this.start_attempt(tunnel_file, generation).await;
                });
            }
        }
        self.broadcast(None).await;
    }

    /// Drive one start attempt to its resolution. The backend's callback
    /// is the only resolution signal; when a watchdog is configured, its
    /// expiry injects a synthetic failure through the same stale-checked
    /// path a real failure takes.
    pub(crate) async fn start_attempt(self: Arc<Self>, tunnel_file: String, generation: u64) {
        let attempt = self.backend.start_tunnel(&tunnel_file);
        let outcome = match self.config.start_watchdog() {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(TunnelError::WatchdogTimeout(limit)),
            },
            None => attempt.await,
        };
        match outcome {
            Ok(()) => {
                debug!("{tunnel_file}: established");
                self.state.complete_intent(&tunnel_file, generation);
                // Connectivity may have vanished while the start was in
                // flight; the loss evaluation saw nothing running, so a
                // success landing now must be re-checked or the tunnel
                // stays up with no network under it.
                let snap = self.state.snapshot();
                let lost = snap.rules_enabled
                    && snap
                        .current_network
                        .as_ref()
                        .is_some_and(NetworkState::is_none);
                if lost {
                    info!("{tunnel_file}: established after network loss, re-evaluating");
                    self.request_eval(Trigger::NetworkChanged).await;
                }
                self.broadcast(None).await;
            }
            Err(error) => {
                self.fail_attempt(&tunnel_file, Some(generation), &error.to_string())
                    .await;
            }
        }
    }

    /// Structured transition record, emitted whether or not a switch
    /// occurred.
    async fn log_decision(
        &self,
        network: &Option<NetworkState>,
        status: &VpnRuntimeStatus,
        trigger: Trigger,
        decision: &Decision,
    ) {
        // Only a committed none-state is a loss; an unobserved network
        // (nothing committed yet) is an ordinary evaluation.
        let network_lost = network.as_ref().is_some_and(NetworkState::is_none);
        let kind = if network_lost {
            LogKind::NetworkLost
        } else {
            LogKind::Transition
        };
        let mut event = LogEvent::new(kind).detail(format!("trigger: {trigger}"));
        if status.is_running {
            if let Some(from) = &status.active_tunnel_file {
                event = event.from_tunnel(from.clone());
            }
        }
        if let Decision::Start { tunnel_file, .. } = decision {
            event = event.to_tunnel(tunnel_file.clone());
        }
        if let Some(ssid) = network.as_ref().and_then(|n| n.ssid.clone()) {
            event = event.ssid(ssid);
        }
        self.store.append_log(event).await;
    }
}

// ── Background loops ─────────────────────────────────────────────────

async fn eval_loop(
    inner: Arc<EngineInner>,
    mut rx: mpsc::Receiver<Trigger>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            trigger = rx.recv() => {
                let Some(mut trigger) = trigger else { break };
                // Last-write-wins: queued triggers are superseded, only
                // the newest conclusion applies to the live state.
                while let Ok(newer) = rx.try_recv() {
                    trigger = newer;
                }
                Arc::clone(&inner).evaluate(trigger).await;
            }
        }
    }
    debug!("evaluation loop stopped");
}

async fn network_loop(inner: Arc<EngineInner>, cancel: CancellationToken) {
    let (commit_tx, mut commit_rx) = mpsc::channel(EVAL_QUEUE_CAPACITY);
    tokio::spawn(NetworkArbiter::new().run(
        Arc::clone(&inner.source),
        commit_tx,
        inner.config.debounce(),
        cancel.clone(),
    ));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            committed = commit_rx.recv() => {
                let Some(network) = committed else { break };
                let fingerprint_changed = inner.state.on_environment_changed(network);
                debug!("network committed (fingerprint changed: {fingerprint_changed})");
                inner.request_eval(Trigger::NetworkChanged).await;
            }
        }
    }
    debug!("network loop stopped");
}

async fn rules_loop(
    inner: Arc<EngineInner>,
    mut rules_rx: watch::Receiver<Vec<AgentRule>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = rules_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let rules = rules_rx.borrow_and_update().clone();
                debug!("rule list changed ({} rules), clearing blacklist", rules.len());
                inner.state.on_rules_changed(rules);
                inner.request_eval(Trigger::RulesChanged).await;
            }
        }
    }
    debug!("rules loop stopped");
}
