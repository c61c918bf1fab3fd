//! Periodic enforcement of decisions on the foreground target

use chrono::{DateTime, Local};
use guardian_config::{AgentConfig, EnforcementAction};
use guardian_host_api::{HostAdapter, UsageEventKind};
use guardian_store::{AuditEvent, AuditEventType, Store};
use guardian_util::TargetId;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::{BlockReason, CoreError, CoreEvent, CoreResult, Decision, PolicyEngine, QuotaWarning};

/// How far back foreground transitions are searched
const EVENT_LOOKBACK_MS: i64 = 2 * 60 * 1000;

/// Range of the aggregate fallback query
const STATS_LOOKBACK_MS: i64 = 60 * 1000;

#[derive(Debug, Default)]
struct EnforcerState {
    /// Last foreground target that was not the agent itself
    last_observed: Option<TargetId>,
    /// Target most recently found blocked, for transition logging
    blocked: Option<TargetId>,
    /// Blocked targets the window guard found visible; the overlay stays up
    /// while any of them is still on screen
    window_blocks: Vec<TargetId>,
    /// Whether the last foreground query failed
    degraded: bool,
}

/// Applies decisions to the host: overlay, termination and warnings
pub struct Enforcer {
    host: Arc<dyn HostAdapter>,
    engine: Arc<PolicyEngine>,
    action: EnforcementAction,
    interval: Duration,
    query_timeout: Duration,
    store: Option<Arc<dyn Store>>,
    events: Option<mpsc::UnboundedSender<CoreEvent>>,
    state: Mutex<EnforcerState>,
}

impl Enforcer {
    pub fn new(host: Arc<dyn HostAdapter>, engine: Arc<PolicyEngine>, config: &AgentConfig) -> Self {
        Self {
            host,
            engine,
            action: config.enforcement_action,
            interval: config.sample_interval,
            query_timeout: config.query_timeout,
            store: None,
            events: None,
            state: Mutex::new(EnforcerState::default()),
        }
    }

    /// Record blocks in the audit log
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Report outcomes on `events`
    pub fn with_events(mut self, events: mpsc::UnboundedSender<CoreEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn engine(&self) -> &Arc<PolicyEngine> {
        &self.engine
    }

    /// Target currently in front, if the host can tell.
    ///
    /// The most recent move-to-foreground transition wins; with none in the
    /// lookback window, the most recently used target of the last minute.
    pub async fn foreground_target(&self, now: &DateTime<Local>) -> CoreResult<Option<TargetId>> {
        let end = now.timestamp_millis();

        let events = tokio::time::timeout(
            self.query_timeout,
            self.host.query_usage_events(end - EVENT_LOOKBACK_MS, end),
        )
        .await
        .map_err(|_| CoreError::Timeout("usage events"))??;

        let latest = events
            .into_iter()
            .filter(|e| e.kind == UsageEventKind::MoveToForeground)
            .max_by_key(|e| e.timestamp_ms);
        if let Some(event) = latest {
            return Ok(Some(event.target));
        }

        let stats = tokio::time::timeout(
            self.query_timeout,
            self.host.query_usage_stats(end - STATS_LOOKBACK_MS, end),
        )
        .await
        .map_err(|_| CoreError::Timeout("usage stats"))??;

        Ok(stats
            .into_iter()
            .filter(|s| s.last_used_ms > 0)
            .max_by_key(|s| s.last_used_ms)
            .map(|s| s.target))
    }

    /// One enforcement pass. Returns the decision taken, or `None` when no
    /// target could be determined.
    pub async fn tick(&self, now: &DateTime<Local>) -> Option<Decision> {
        self.release_expired_lock(now);

        let observed = match self.foreground_target(now).await {
            Ok(observed) => {
                self.set_degraded(false);
                observed?
            }
            Err(e) => {
                if self.set_degraded(true) {
                    warn!(error = %e, "Cannot determine foreground target");
                }
                return None;
            }
        };

        // Our own surface in front: keep judging what is underneath it
        let target = {
            let mut state = self.state.lock().unwrap();
            if &observed == self.engine.self_target() {
                state.last_observed.clone()?
            } else {
                state.last_observed = Some(observed.clone());
                observed
            }
        };

        let decision = self.engine.decide(&target, now).await;
        trace!(target_id = %target, ?decision, "Evaluated foreground");

        match &decision {
            Decision::Block(reason) => self.enforce_block(&target, reason).await,
            Decision::Allow(_) => self.lift_block(now).await,
            Decision::Warn(warning) => {
                self.lift_block(now).await;
                self.warn_user(&target, warning).await;
            }
        }

        Some(decision)
    }

    /// Run `tick` every sampling interval until `shutdown` flips to `true`
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            action = ?self.action,
            "Enforcement loop started"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = guardian_util::now();
                    self.tick(&now).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Enforcement loop stopped");
    }

    /// Apply the configured action to a blocked target
    pub async fn enforce_block(&self, target: &TargetId, reason: &BlockReason) {
        let newly_blocked = {
            let mut state = self.state.lock().unwrap();
            let newly = state.blocked.as_ref() != Some(target);
            state.blocked = Some(target.clone());
            newly
        };

        if newly_blocked {
            info!(target_id = %target, %reason, "Target blocked");
            self.audit(AuditEventType::TargetBlocked {
                target: target.clone(),
                reason: reason.to_string(),
            });
        }

        if self.action.shows_overlay() && !self.host.overlay_visible() {
            match self.host.show_overlay(target, &reason.to_string()).await {
                Ok(()) => self.emit(CoreEvent::OverlayShown {
                    target: target.clone(),
                    reason: reason.clone(),
                }),
                Err(e) => warn!(target_id = %target, error = %e, "Failed to show overlay"),
            }
        }

        if self.action.terminates() {
            match self.host.force_stop(target).await {
                Ok(()) => {
                    info!(target_id = %target, "Target terminated");
                    self.emit(CoreEvent::TargetTerminated {
                        target: target.clone(),
                    });
                }
                Err(e) => warn!(target_id = %target, error = %e, "Failed to stop target"),
            }
        }
    }

    /// Replace the set of blocked targets found in visible windows
    pub fn set_window_blocks(&self, targets: Vec<TargetId>) {
        self.state.lock().unwrap().window_blocks = targets;
    }

    async fn lift_block(&self, now: &DateTime<Local>) {
        let window_blocks = {
            let mut state = self.state.lock().unwrap();
            state.blocked = None;
            state.window_blocks.clone()
        };

        if !self.host.overlay_visible() {
            return;
        }

        if !window_blocks.is_empty() {
            let remaining = self.still_blocked_on_screen(window_blocks, now).await;
            let keep = !remaining.is_empty();
            self.state.lock().unwrap().window_blocks = remaining;
            if keep {
                trace!("Overlay kept for a blocked window");
                return;
            }
        }

        match self.host.hide_overlay().await {
            Ok(()) => {
                debug!("Overlay hidden");
                self.emit(CoreEvent::OverlayHidden);
            }
            Err(e) => warn!(error = %e, "Failed to hide overlay"),
        }
    }

    /// Targets of `candidates` that are still visible and still blocked.
    /// When the window list cannot be read, all of them are kept.
    async fn still_blocked_on_screen(
        &self,
        candidates: Vec<TargetId>,
        now: &DateTime<Local>,
    ) -> Vec<TargetId> {
        let windows = match tokio::time::timeout(self.query_timeout, self.host.visible_windows()).await {
            Ok(Ok(windows)) => windows,
            Ok(Err(e)) => {
                debug!(error = %e, "Cannot list windows, keeping overlay");
                return candidates;
            }
            Err(_) => {
                debug!("Window listing timed out, keeping overlay");
                return candidates;
            }
        };

        let mut remaining = Vec::new();
        for target in candidates {
            if windows.iter().any(|w| w.target == target) && self.engine.is_blocked(&target, now).await {
                remaining.push(target);
            }
        }
        remaining
    }

    /// Notify the user that a quota is about to run out
    pub async fn warn_user(&self, target: &TargetId, warning: &QuotaWarning) {
        let minutes = (warning.remaining_ms / 60_000).max(1);
        let body = format!("{} minutes left for {}", minutes, target);

        if let Err(e) = self.host.notify("Time limit approaching", &body).await {
            debug!(error = %e, "Warning notification failed");
        }
        self.emit(CoreEvent::WarningIssued {
            target: target.clone(),
            warning: warning.clone(),
        });
    }

    fn release_expired_lock(&self, now: &DateTime<Local>) {
        if self
            .engine
            .policy()
            .release_expired_lock(now.timestamp_millis())
        {
            info!("Timed global lock expired");
            self.audit(AuditEventType::LockChanged {
                locked: false,
                until_ms: 0,
            });
            self.emit(CoreEvent::LockReleased);
        }
    }

    /// Returns `true` when the flag changed
    fn set_degraded(&self, degraded: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        let changed = state.degraded != degraded;
        state.degraded = degraded;
        if changed && !degraded {
            info!("Foreground detection recovered");
        }
        changed
    }

    fn audit(&self, event: AuditEventType) {
        if let Some(store) = &self.store
            && let Err(e) = store.append_audit(AuditEvent::new(event))
        {
            warn!(error = %e, "Failed to write audit event");
        }
    }

    fn emit(&self, event: CoreEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
