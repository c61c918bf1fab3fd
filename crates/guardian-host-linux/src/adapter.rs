//! Linux host adapter implementation

use async_trait::async_trait;
use guardian_host_api::{
    HostAdapter, HostCapabilities, HostError, HostEvent, HostResult, InstalledTarget, UsageEvent,
    UsageStat, WindowInfo,
};
use guardian_util::TargetId;
use nix::sys::signal::Signal;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::desktop::DesktopDirs;
use crate::focus::FocusJournal;
use crate::power::{POWER_SUPPLY_DIR, read_battery_level};
use crate::process::{ManagedProcess, signal_by_name};
use crate::sway;

/// How long focus history is kept
const JOURNAL_RETENTION_MS: i64 = 2 * 24 * 60 * 60 * 1000;

/// Installed applications are rescanned every this many monitor polls
const INSTALLED_RESCAN_POLLS: u32 = 30;

/// Settings for [`LinuxHost`]
#[derive(Debug, Clone)]
pub struct LinuxHostConfig {
    /// argv of the interruption overlay
    pub overlay_command: Vec<String>,
    /// Bound on every external command
    pub command_timeout: Duration,
    /// Desktop id of the agent itself, for launcher hiding
    pub self_target: TargetId,
    pub power_supply_dir: PathBuf,
    pub desktop_dirs: DesktopDirs,
}

impl LinuxHostConfig {
    pub fn new(overlay_command: Vec<String>, command_timeout: Duration, self_target: TargetId) -> Self {
        Self {
            overlay_command,
            command_timeout,
            self_target,
            power_supply_dir: PathBuf::from(POWER_SUPPLY_DIR),
            desktop_dirs: DesktopDirs::from_env(),
        }
    }
}

/// What the monitor saw on its previous poll
#[derive(Debug, Default)]
struct MonitorState {
    layout: Vec<(TargetId, bool)>,
    battery: Option<u8>,
    installed: Option<BTreeSet<TargetId>>,
}

/// Linux host adapter for sway sessions
pub struct LinuxHost {
    capabilities: HostCapabilities,
    config: LinuxHostConfig,
    journal: Arc<Mutex<FocusJournal>>,
    overlay: Mutex<Option<ManagedProcess>>,
    event_tx: mpsc::UnboundedSender<HostEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<HostEvent>>>,
}

impl LinuxHost {
    pub fn new(config: LinuxHostConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            capabilities: HostCapabilities::linux_sway(),
            config,
            journal: Arc::new(Mutex::new(FocusJournal::new())),
            overlay: Mutex::new(None),
            event_tx: tx,
            event_rx: Mutex::new(Some(rx)),
        }
    }

    /// Poll sway, battery and installed applications every `interval`,
    /// feeding the focus journal and emitting host events on change
    pub fn start_monitor(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let host = self.clone();

        tokio::spawn(async move {
            let mut state = MonitorState::default();
            let mut polls: u32 = 0;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            info!(interval_ms = interval.as_millis() as u64, "Host monitor started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        host.poll(&mut state, polls % INSTALLED_RESCAN_POLLS == 0).await;
                        polls = polls.wrapping_add(1);
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Host monitor stopped");
        })
    }

    async fn poll(&self, state: &mut MonitorState, rescan_installed: bool) {
        let now_ms = guardian_util::now_millis();

        match sway::visible_windows(self.config.command_timeout).await {
            Ok(windows) => {
                let focused = windows.iter().find(|w| w.focused).map(|w| &w.target);
                {
                    let mut journal = self.journal.lock().unwrap();
                    if journal.observe(focused, now_ms) {
                        debug!(focused = ?focused, "Focus changed");
                    }
                    journal.prune_before(now_ms - JOURNAL_RETENTION_MS);
                }

                let layout: Vec<_> = windows.into_iter().map(|w| (w.target, w.focused)).collect();
                if layout != state.layout {
                    state.layout = layout;
                    self.emit(HostEvent::WindowsChanged);
                }
            }
            Err(e) => debug!(error = %e, "Window poll failed"),
        }

        let battery = read_battery_level(&self.config.power_supply_dir);
        if battery != state.battery {
            state.battery = battery;
            if let Some(level) = battery {
                self.emit(HostEvent::BatteryChanged(level));
            }
        }

        if rescan_installed {
            let current: BTreeSet<TargetId> = self
                .config
                .desktop_dirs
                .installed(false)
                .into_iter()
                .map(|i| i.target)
                .collect();

            // The first scan only establishes the baseline
            if let Some(previous) = &state.installed {
                for added in current.difference(previous) {
                    info!(target_id = %added, "Application installed");
                    self.emit(HostEvent::TargetInstalled(added.clone()));
                }
                for removed in previous.difference(&current) {
                    info!(target_id = %removed, "Application removed");
                    self.emit(HostEvent::TargetRemoved(removed.clone()));
                }
            }
            state.installed = Some(current);
        }
    }

    fn emit(&self, event: HostEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn run_bounded(&self, program: &str, args: &[&str]) -> HostResult<()> {
        let status = tokio::time::timeout(
            self.config.command_timeout,
            Command::new(program).args(args).status(),
        )
        .await
        .map_err(|_| HostError::QueryFailed(format!("{} timed out", program)))??;

        if status.success() {
            Ok(())
        } else {
            Err(HostError::Internal(format!("{} exited with {}", program, status)))
        }
    }
}

#[async_trait]
impl HostAdapter for LinuxHost {
    fn capabilities(&self) -> &HostCapabilities {
        &self.capabilities
    }

    async fn query_usage_events(&self, start_ms: i64, end_ms: i64) -> HostResult<Vec<UsageEvent>> {
        Ok(self.journal.lock().unwrap().events_between(start_ms, end_ms))
    }

    async fn query_usage_stats(&self, start_ms: i64, end_ms: i64) -> HostResult<Vec<UsageStat>> {
        Ok(self.journal.lock().unwrap().stats_between(start_ms, end_ms))
    }

    async fn visible_windows(&self) -> HostResult<Vec<WindowInfo>> {
        sway::visible_windows(self.config.command_timeout).await
    }

    async fn show_overlay(&self, target: &TargetId, reason: &str) -> HostResult<()> {
        let mut overlay = self.overlay.lock().unwrap();
        if overlay.as_mut().is_some_and(|p| p.is_running()) {
            return Ok(());
        }

        let process = ManagedProcess::spawn(&self.config.overlay_command)?;
        info!(target_id = %target, reason, pid = process.pid, "Overlay shown");
        *overlay = Some(process);
        Ok(())
    }

    async fn hide_overlay(&self) -> HostResult<()> {
        let Some(mut process) = self.overlay.lock().unwrap().take() else {
            return Ok(());
        };
        if !process.is_running() {
            return Ok(());
        }

        // swaylock releases the session lock on SIGUSR1; for other overlay
        // programs the default action of SIGUSR1 terminates them
        process.signal(Signal::SIGUSR1)?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        if process.is_running() {
            process.signal(Signal::SIGTERM)?;
        }

        info!(pid = process.pid, "Overlay hidden");
        Ok(())
    }

    fn overlay_visible(&self) -> bool {
        self.overlay
            .lock()
            .unwrap()
            .as_mut()
            .is_some_and(|p| p.is_running())
    }

    async fn force_stop(&self, target: &TargetId) -> HostResult<()> {
        sway::kill_windows(target, self.config.command_timeout).await?;

        // The process name is usually the last component of a reverse-DNS id
        let short = target.as_str().rsplit('.').next().unwrap_or(target.as_str());
        let mut signalled = signal_by_name(target.as_str(), Signal::SIGTERM);
        if short != target.as_str() {
            signalled += signal_by_name(short, Signal::SIGTERM);
        }

        info!(target_id = %target, signalled, "Force stop requested");
        Ok(())
    }

    async fn notify(&self, title: &str, body: &str) -> HostResult<()> {
        self.run_bounded("notify-send", &["-u", "critical", "-a", "guardian", title, body])
            .await
    }

    async fn battery_level(&self) -> Option<u8> {
        read_battery_level(&self.config.power_supply_dir)
    }

    async fn installed_targets(&self, include_icons: bool) -> HostResult<Vec<InstalledTarget>> {
        let dirs = self.config.desktop_dirs.clone();
        tokio::task::spawn_blocking(move || dirs.installed(include_icons))
            .await
            .map_err(|e| HostError::Internal(e.to_string()))
    }

    async fn set_launcher_visible(&self, visible: bool) -> HostResult<()> {
        self.config
            .desktop_dirs
            .set_hidden(self.config.self_target.as_str(), !visible)?;
        info!(visible, "Launcher visibility changed");
        Ok(())
    }

    async fn apply_locale(&self, code: &str) -> HostResult<()> {
        // The session locale is owned by the login manager
        debug!(code, "Locale change not applied on this host");
        Err(HostError::Unsupported)
    }

    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<HostEvent>> {
        self.event_rx.lock().unwrap().take()
    }

    fn is_healthy(&self) -> bool {
        if let Ok(socket) = std::env::var("SWAYSOCK") {
            return !socket.is_empty();
        }
        warn!("SWAYSOCK not set, window inspection unavailable");
        false
    }
}
