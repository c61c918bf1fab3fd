//! Mock host adapter for testing

use async_trait::async_trait;
use guardian_util::TargetId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::{
    Automation, ControlHandle, HostAdapter, HostCapabilities, HostError, HostEvent, HostResult,
    InstalledTarget, UsageEvent, UsageStat, WindowInfo,
};

#[derive(Debug, Default)]
struct MockState {
    usage_events: Vec<UsageEvent>,
    usage_stats: Vec<UsageStat>,
    windows: Vec<WindowInfo>,
    overlay: Option<TargetId>,
    overlay_shows: usize,
    stopped: Vec<TargetId>,
    notifications: Vec<(String, String)>,
    battery: Option<u8>,
    installed: Vec<InstalledTarget>,
    launcher_visible: bool,
    locale: Option<String>,
    controls: HashMap<String, Vec<ControlHandle>>,
    activated: Vec<ControlHandle>,
    fail_queries: bool,
}

/// Scriptable host adapter for unit/integration testing
pub struct MockHost {
    capabilities: HostCapabilities,
    state: Arc<Mutex<MockState>>,
    event_tx: mpsc::UnboundedSender<HostEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<HostEvent>>>,
}

impl MockHost {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = MockState {
            launcher_visible: true,
            ..MockState::default()
        };

        Self {
            capabilities: HostCapabilities::full(),
            state: Arc::new(Mutex::new(state)),
            event_tx: tx,
            event_rx: Mutex::new(Some(rx)),
        }
    }

    /// Record a move-to-foreground transition
    pub fn bring_to_foreground(&self, target: impl Into<TargetId>, timestamp_ms: i64) {
        self.state
            .lock()
            .unwrap()
            .usage_events
            .push(UsageEvent::foreground(target, timestamp_ms));
    }

    pub fn push_usage_event(&self, event: UsageEvent) {
        self.state.lock().unwrap().usage_events.push(event);
    }

    pub fn set_usage_stats(&self, stats: Vec<UsageStat>) {
        self.state.lock().unwrap().usage_stats = stats;
    }

    pub fn set_windows(&self, windows: Vec<WindowInfo>) {
        self.state.lock().unwrap().windows = windows;
    }

    pub fn set_battery(&self, level: Option<u8>) {
        self.state.lock().unwrap().battery = level;
    }

    pub fn set_installed(&self, installed: Vec<InstalledTarget>) {
        self.state.lock().unwrap().installed = installed;
    }

    /// Make usage and window queries fail as if permission were missing
    pub fn set_fail_queries(&self, fail: bool) {
        self.state.lock().unwrap().fail_queries = fail;
    }

    /// Controls returned when searching for `label`
    pub fn set_controls(&self, label: impl Into<String>, controls: Vec<ControlHandle>) {
        self.state
            .lock()
            .unwrap()
            .controls
            .insert(label.into(), controls);
    }

    /// Inject a host event
    pub fn emit(&self, event: HostEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Target the overlay currently covers
    pub fn overlay_target(&self) -> Option<TargetId> {
        self.state.lock().unwrap().overlay.clone()
    }

    /// How many times the overlay was raised
    pub fn overlay_show_count(&self) -> usize {
        self.state.lock().unwrap().overlay_shows
    }

    pub fn stopped_targets(&self) -> Vec<TargetId> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().notifications.clone()
    }

    pub fn activated_controls(&self) -> Vec<ControlHandle> {
        self.state.lock().unwrap().activated.clone()
    }

    pub fn launcher_visible(&self) -> bool {
        self.state.lock().unwrap().launcher_visible
    }

    pub fn locale(&self) -> Option<String> {
        self.state.lock().unwrap().locale.clone()
    }

    fn check_queries(&self) -> HostResult<()> {
        if self.state.lock().unwrap().fail_queries {
            Err(HostError::PermissionDenied("mock usage access revoked".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostAdapter for MockHost {
    fn capabilities(&self) -> &HostCapabilities {
        &self.capabilities
    }

    async fn query_usage_events(&self, start_ms: i64, end_ms: i64) -> HostResult<Vec<UsageEvent>> {
        self.check_queries()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .usage_events
            .iter()
            .filter(|e| e.timestamp_ms >= start_ms && e.timestamp_ms <= end_ms)
            .cloned()
            .collect())
    }

    async fn query_usage_stats(&self, _start_ms: i64, _end_ms: i64) -> HostResult<Vec<UsageStat>> {
        self.check_queries()?;
        Ok(self.state.lock().unwrap().usage_stats.clone())
    }

    async fn visible_windows(&self) -> HostResult<Vec<WindowInfo>> {
        self.check_queries()?;
        Ok(self.state.lock().unwrap().windows.clone())
    }

    async fn show_overlay(&self, target: &TargetId, _reason: &str) -> HostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.overlay = Some(target.clone());
        state.overlay_shows += 1;
        Ok(())
    }

    async fn hide_overlay(&self) -> HostResult<()> {
        self.state.lock().unwrap().overlay = None;
        Ok(())
    }

    fn overlay_visible(&self) -> bool {
        self.state.lock().unwrap().overlay.is_some()
    }

    async fn force_stop(&self, target: &TargetId) -> HostResult<()> {
        self.state.lock().unwrap().stopped.push(target.clone());
        Ok(())
    }

    async fn notify(&self, title: &str, body: &str) -> HostResult<()> {
        self.state
            .lock()
            .unwrap()
            .notifications
            .push((title.to_string(), body.to_string()));
        Ok(())
    }

    async fn battery_level(&self) -> Option<u8> {
        self.state.lock().unwrap().battery
    }

    async fn installed_targets(&self, include_icons: bool) -> HostResult<Vec<InstalledTarget>> {
        let mut installed = self.state.lock().unwrap().installed.clone();
        if !include_icons {
            for target in &mut installed {
                target.icon_base64 = None;
            }
        }
        Ok(installed)
    }

    async fn set_launcher_visible(&self, visible: bool) -> HostResult<()> {
        self.state.lock().unwrap().launcher_visible = visible;
        Ok(())
    }

    async fn apply_locale(&self, code: &str) -> HostResult<()> {
        self.state.lock().unwrap().locale = Some(code.to_string());
        Ok(())
    }

    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<HostEvent>> {
        self.event_rx.lock().unwrap().take()
    }
}

#[async_trait]
impl Automation for MockHost {
    async fn find_controls_by_label(&self, label: &str) -> HostResult<Vec<ControlHandle>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .controls
            .get(label)
            .cloned()
            .unwrap_or_default())
    }

    async fn activate(&self, control: &ControlHandle) -> HostResult<()> {
        self.state.lock().unwrap().activated.push(control.clone());
        Ok(())
    }
}
