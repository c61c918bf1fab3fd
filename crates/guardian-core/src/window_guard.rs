//! Reaction to windowing changes: multi-window checks and the force-stop flow

use chrono::{DateTime, Local};
use guardian_config::AgentConfig;
use guardian_host_api::{Automation, ControlHandle, HostAdapter, HostEvent};
use guardian_util::TargetId;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::{Decision, Enforcer};

/// Labels of the "terminate application" control
pub const FORCE_STOP_LABELS: &[&str] = &[
    "Force stop",
    "FORCE STOP",
    "Forcer l'arrêt",
    "FORCER L'ARRÊT",
    "فرض الإيقاف",
    "إيقاف إجباري",
];

/// Labels of the confirmation dialog's accept control
pub const CONFIRM_LABELS: &[&str] = &[
    "OK",
    "Ok",
    "موافق",
    "Force stop",
    "FORCE STOP",
    "Forcer l'arrêt",
    "إيقاف إجباري",
];

/// What one pass of the guard did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GuardReport {
    /// Visible targets found blocked
    pub blocked: Vec<TargetId>,
    /// Visible targets whose quota warning was delivered
    pub warned: Vec<TargetId>,
    /// Control activated by the force-stop flow
    pub activated: Option<ControlHandle>,
}

/// Checks every visible window when the layout changes
pub struct WindowGuard {
    host: Arc<dyn HostAdapter>,
    automation: Arc<dyn Automation>,
    enforcer: Arc<Enforcer>,
    settings_targets: Vec<TargetId>,
    system_targets: Vec<TargetId>,
    settings_automation: bool,
}

impl WindowGuard {
    pub fn new(
        host: Arc<dyn HostAdapter>,
        automation: Arc<dyn Automation>,
        enforcer: Arc<Enforcer>,
        config: &AgentConfig,
    ) -> Self {
        let settings_automation = config.settings_automation && automation.is_available();
        Self {
            host,
            automation,
            enforcer,
            settings_targets: config.settings_targets.clone(),
            system_targets: config.system_targets.clone(),
            settings_automation,
        }
    }

    /// Whether the force-stop flow runs in settings targets
    pub fn settings_automation(&self) -> bool {
        self.settings_automation
    }

    fn is_exempt(&self, target: &TargetId) -> bool {
        self.settings_targets.contains(target)
            || self.system_targets.contains(target)
            || target == self.enforcer.engine().self_target()
    }

    pub async fn on_windows_changed(&self, now: &DateTime<Local>) -> GuardReport {
        let mut report = GuardReport::default();

        let windows = match self.host.visible_windows().await {
            Ok(windows) => windows,
            Err(e) => {
                debug!(error = %e, "Cannot list windows");
                return report;
            }
        };

        if self.settings_automation
            && windows
                .iter()
                .any(|w| w.focused && self.settings_targets.contains(&w.target))
        {
            report.activated = self.confirm_force_stop().await;
        }

        for window in windows.iter().filter(|w| !self.is_exempt(&w.target)) {
            if report.blocked.contains(&window.target) || report.warned.contains(&window.target) {
                continue;
            }
            match self.enforcer.engine().decide(&window.target, now).await {
                Decision::Block(reason) => {
                    self.enforcer.enforce_block(&window.target, &reason).await;
                    report.blocked.push(window.target.clone());
                }
                // Already recorded by decide(); delivered here or never
                Decision::Warn(warning) => {
                    self.enforcer.warn_user(&window.target, &warning).await;
                    report.warned.push(window.target.clone());
                }
                Decision::Allow(_) => {}
            }
        }
        self.enforcer.set_window_blocks(report.blocked.clone());

        report
    }

    /// Click through the settings surface's force-stop flow. Missing
    /// controls are not an error; the next change tries again.
    async fn confirm_force_stop(&self) -> Option<ControlHandle> {
        if let Some(control) = self
            .first_control(FORCE_STOP_LABELS, |c| c.clickable && c.enabled)
            .await
        {
            return self.activate(control).await;
        }

        let control = self
            .first_control(CONFIRM_LABELS, |c| c.clickable && c.is_button())
            .await?;
        self.activate(control).await
    }

    async fn first_control(
        &self,
        labels: &[&str],
        usable: impl Fn(&ControlHandle) -> bool,
    ) -> Option<ControlHandle> {
        for label in labels {
            match self.automation.find_controls_by_label(label).await {
                Ok(controls) => {
                    if let Some(control) = controls.into_iter().find(|c| usable(c)) {
                        return Some(control);
                    }
                }
                Err(e) => debug!(label, error = %e, "Control lookup failed"),
            }
        }
        None
    }

    async fn activate(&self, control: ControlHandle) -> Option<ControlHandle> {
        match self.automation.activate(&control).await {
            Ok(()) => {
                info!(label = %control.label, "Activated force-stop control");
                Some(control)
            }
            Err(e) => {
                debug!(label = %control.label, error = %e, "Control activation failed");
                None
            }
        }
    }

    /// Consume host notifications until shutdown. Non-window events are
    /// passed on to `forward`.
    pub async fn run(
        self: Arc<Self>,
        mut host_events: mpsc::UnboundedReceiver<HostEvent>,
        forward: mpsc::UnboundedSender<HostEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = host_events.recv() => {
                    match event {
                        Some(HostEvent::WindowsChanged) => {
                            let now = guardian_util::now();
                            self.on_windows_changed(&now).await;
                        }
                        Some(other) => {
                            let _ = forward.send(other);
                        }
                        None => {
                            warn!("Host event stream closed");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CategoryResolver, PolicyEngine, PolicyStore, UsageAccounting};
    use chrono::TimeZone;
    use guardian_api::{PolicySnapshot, Rule};
    use guardian_host_api::{MockHost, NoAutomation, UsageStat, WindowInfo};
    use std::time::Duration;

    fn window(target: &str, focused: bool) -> WindowInfo {
        WindowInfo {
            target: TargetId::new(target),
            title: None,
            focused,
        }
    }

    fn control(label: &str, class_name: &str, clickable: bool, enabled: bool) -> ControlHandle {
        ControlHandle {
            id: format!("{}#{}", class_name, label),
            label: label.to_string(),
            class_name: class_name.to_string(),
            clickable,
            enabled,
        }
    }

    fn config(settings_automation: bool) -> AgentConfig {
        AgentConfig {
            settings_targets: vec![TargetId::new("gnome-control-center")],
            settings_automation,
            system_targets: vec![TargetId::new("waybar")],
            query_timeout: Duration::from_millis(100),
            ..AgentConfig::default()
        }
    }

    struct Harness {
        host: Arc<MockHost>,
        policy: Arc<PolicyStore>,
        enforcer: Arc<Enforcer>,
        guard: WindowGuard,
    }

    fn harness_with(snapshot: PolicySnapshot, config: AgentConfig) -> Harness {
        let host = Arc::new(MockHost::new());
        let policy = Arc::new(PolicyStore::new(snapshot));
        let engine = Arc::new(PolicyEngine::new(
            policy.clone(),
            UsageAccounting::new(host.clone(), config.query_timeout),
            CategoryResolver::default(),
            config.self_target.clone(),
            config.warning_threshold,
        ));
        let enforcer = Arc::new(Enforcer::new(host.clone(), engine, &config));
        let guard = WindowGuard::new(host.clone(), host.clone(), enforcer.clone(), &config);
        Harness {
            host,
            policy,
            enforcer,
            guard,
        }
    }

    fn harness(snapshot: PolicySnapshot) -> Harness {
        harness_with(snapshot, config(true))
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn blocks_any_visible_window() {
        let h = harness(PolicySnapshot {
            rules: vec![Rule::new("video").blocked()],
            ..Default::default()
        });
        // Picture-in-picture: blocked target visible but not focused
        h.host
            .set_windows(vec![window("reader", true), window("video", false)]);

        let report = h.guard.on_windows_changed(&now()).await;

        assert_eq!(report.blocked, vec![TargetId::new("video")]);
        assert_eq!(h.host.overlay_target(), Some(TargetId::new("video")));
    }

    #[tokio::test]
    async fn overlay_stays_while_blocked_window_is_visible() {
        let h = harness(PolicySnapshot {
            rules: vec![Rule::new("video").blocked()],
            ..Default::default()
        });
        let now = now();
        h.host
            .set_windows(vec![window("reader", true), window("video", false)]);
        h.host.bring_to_foreground("reader", now.timestamp_millis() - 1000);

        h.guard.on_windows_changed(&now).await;
        assert!(matches!(h.enforcer.tick(&now).await, Some(Decision::Allow(_))));
        assert!(h.host.overlay_visible());

        // The floating window is closed: the next tick lifts the overlay
        h.host.set_windows(vec![window("reader", true)]);
        h.enforcer.tick(&now).await;
        assert!(!h.host.overlay_visible());
    }

    #[tokio::test]
    async fn temporary_unlock_lifts_overlay_over_visible_window() {
        let h = harness(PolicySnapshot {
            rules: vec![Rule::new("video").blocked()],
            ..Default::default()
        });
        let now = now();
        h.host
            .set_windows(vec![window("reader", true), window("video", false)]);
        h.host.bring_to_foreground("reader", now.timestamp_millis() - 1000);
        h.guard.on_windows_changed(&now).await;

        h.policy
            .extend_temporary_unlock(now.timestamp_millis() + 60_000);
        h.enforcer.tick(&now).await;

        assert!(!h.host.overlay_visible());
    }

    #[tokio::test]
    async fn warning_found_by_guard_is_delivered_once() {
        let h = harness(PolicySnapshot {
            rules: vec![Rule::new("game").with_quota_ms(60 * 60_000)],
            ..Default::default()
        });
        let now = now();
        h.host.set_windows(vec![window("game", true)]);
        h.host.bring_to_foreground("game", now.timestamp_millis() - 1000);
        h.host.set_usage_stats(vec![UsageStat {
            target: TargetId::new("game"),
            foreground_ms: 55 * 60_000,
            last_used_ms: now.timestamp_millis() - 1000,
        }]);

        let report = h.guard.on_windows_changed(&now).await;
        assert_eq!(report.warned, vec![TargetId::new("game")]);
        assert_eq!(h.host.notifications().len(), 1);

        // The tick loop sees the warning as already given
        h.enforcer.tick(&now).await;
        h.guard.on_windows_changed(&now).await;
        assert_eq!(h.host.notifications().len(), 1);
        assert!(!h.host.overlay_visible());
    }

    #[tokio::test]
    async fn exempt_windows_are_skipped() {
        let mut snapshot = PolicySnapshot::default();
        snapshot.global_lock.locked = true;
        let h = harness(snapshot);
        h.host.set_windows(vec![
            window("waybar", false),
            window("guardian-agentd", true),
        ]);

        let report = h.guard.on_windows_changed(&now()).await;
        assert!(report.blocked.is_empty());
        assert!(!h.host.overlay_visible());
    }

    #[tokio::test]
    async fn force_stop_then_confirm() {
        let h = harness(PolicySnapshot::default());
        h.host.set_windows(vec![window("gnome-control-center", true)]);

        // Disabled button is passed over, the localized one is used
        h.host
            .set_controls("Force stop", vec![control("Force stop", "GtkButton", true, false)]);
        h.host.set_controls(
            "Forcer l'arrêt",
            vec![control("Forcer l'arrêt", "GtkButton", true, true)],
        );
        let report = h.guard.on_windows_changed(&now()).await;
        assert_eq!(report.activated.unwrap().label, "Forcer l'arrêt");

        // Dialog stage: only the confirm control remains
        h.host.set_controls("Forcer l'arrêt", vec![]);
        h.host.set_controls("Force stop", vec![]);
        h.host
            .set_controls("OK", vec![control("OK", "GtkButton", true, true)]);
        let report = h.guard.on_windows_changed(&now()).await;
        assert_eq!(report.activated.unwrap().label, "OK");
        assert_eq!(h.host.activated_controls().len(), 2);
    }

    #[tokio::test]
    async fn confirm_requires_a_button() {
        let h = harness(PolicySnapshot::default());
        h.host.set_windows(vec![window("gnome-control-center", true)]);
        h.host
            .set_controls("OK", vec![control("OK", "GtkLabel", true, true)]);

        let report = h.guard.on_windows_changed(&now()).await;
        assert_eq!(report.activated, None);
        assert!(h.host.activated_controls().is_empty());
    }

    #[tokio::test]
    async fn missing_controls_are_a_no_op() {
        let h = harness(PolicySnapshot::default());
        h.host.set_windows(vec![window("gnome-control-center", true)]);

        assert_eq!(h.guard.on_windows_changed(&now()).await, GuardReport::default());
    }

    #[tokio::test]
    async fn settings_flow_is_opt_in() {
        let h = harness_with(PolicySnapshot::default(), config(false));
        h.host.set_windows(vec![window("gnome-control-center", true)]);
        h.host
            .set_controls("OK", vec![control("OK", "GtkButton", true, true)]);

        assert!(!h.guard.settings_automation());
        assert_eq!(h.guard.on_windows_changed(&now()).await.activated, None);
        assert!(h.host.activated_controls().is_empty());
    }

    #[test]
    fn settings_flow_needs_an_automation_backend() {
        let h = harness(PolicySnapshot::default());
        let guard = WindowGuard::new(
            h.host.clone(),
            Arc::new(NoAutomation),
            h.enforcer.clone(),
            &config(true),
        );
        assert!(h.guard.settings_automation());
        assert!(!guard.settings_automation());
    }

    #[tokio::test]
    async fn run_forwards_device_events() {
        let h = harness(PolicySnapshot::default());
        let host_events = h.host.subscribe().unwrap();
        let (forward_tx, mut forward_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(Arc::new(h.guard).run(host_events, forward_tx, shutdown_rx));

        h.host.emit(HostEvent::WindowsChanged);
        h.host.emit(HostEvent::BatteryChanged(42));
        assert_eq!(forward_rx.recv().await, Some(HostEvent::BatteryChanged(42)));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
