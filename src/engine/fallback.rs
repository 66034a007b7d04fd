//! Fallback control: start-failure handling and the manual override paths.
//!
//! A failed start blacklists the tunnel for the current environment
//! fingerprint and immediately re-evaluates, so the rule list is walked
//! again minus the failed target. Stale failure reports (anything that
//! does not match the pending intent) are discarded without side effects.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::engine::evaluator::Trigger;
use crate::engine::{EngineInner, SelectionEngine, UserNotice};
use crate::store::{LogEvent, LogKind};

impl SelectionEngine {
    /// Backend callback: a tunnel failed to establish. `failed_file` must
    /// name the config file of the failed attempt; reports that do not
    /// match the current pending intent are ignored.
    pub async fn on_tunnel_start_failed(&self, failed_file: &str, error: &str) {
        self.inner.fail_attempt(failed_file, None, error).await;
    }

    /// User-initiated start, bypassing rule matching. Clears the
    /// blacklist and any pending intent first: a manual choice overrides
    /// accumulated fallback history.
    pub async fn manual_start(&self, tunnel_file: &str) {
        let inner = &self.inner;
        inner.state.clear_blacklist_and_intent();
        let generation = inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        inner.state.set_pending_intent(tunnel_file, generation);
        inner
            .store
            .append_log(
                LogEvent::new(LogKind::Manual)
                    .to_tunnel(tunnel_file)
                    .detail("manual start"),
            )
            .await;
        info!("manual start of {tunnel_file}");
        let this = Arc::clone(inner);
        let file = tunnel_file.to_string();
        tokio::spawn(async move {
            this.start_attempt(file, generation).await;
        });
    }

    /// User-initiated stop. Also clears fallback history so the next
    /// automatic evaluation starts from a clean slate.
    pub async fn manual_stop(&self) {
        let inner = &self.inner;
        inner.state.clear_blacklist_and_intent();
        let status = inner.backend.status().await;
        if status.is_running {
            let file = status.active_tunnel_file.unwrap_or_default();
            info!("manual stop of {file}");
            inner
                .store
                .append_log(
                    LogEvent::new(LogKind::Manual)
                        .from_tunnel(file.clone())
                        .detail("manual stop"),
                )
                .await;
            inner.backend.stop_tunnel(&file).await;
        }
        inner.broadcast(None).await;
    }
}

impl EngineInner {
    /// Shared failure path for backend callbacks and watchdog expiry.
    /// Validates the report against the pending intent, blacklists the
    /// tunnel for this environment, surfaces a notice, and re-evaluates.
    pub(crate) async fn fail_attempt(
        &self,
        failed_file: &str,
        generation: Option<u64>,
        error: &str,
    ) {
        if !self.state.record_failure(failed_file, generation) {
            debug!("{failed_file}: stale failure report discarded ({error})");
            return;
        }
        warn!("{failed_file}: start failed, blacklisted for this environment: {error}");

        let snap = self.state.snapshot();
        let mut event = LogEvent::new(LogKind::TunnelError)
            .to_tunnel(failed_file)
            .detail(error);
        if let Some(ssid) = snap.current_network.as_ref().and_then(|n| n.ssid.clone()) {
            event = event.ssid(ssid);
        }
        self.store.append_log(event).await;

        self.broadcast(Some(UserNotice {
            message: format!("tunnel {failed_file} failed to start: {error}"),
            at: Utc::now(),
        }))
        .await;
        self.request_eval(Trigger::TunnelError).await;
    }
}
