//! Host adapter traits

use async_trait::async_trait;
use guardian_util::TargetId;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::HostCapabilities;

/// Errors from host adapter operations
#[derive(Debug, Error)]
pub enum HostError {
    /// The OS refused access (missing usage-access or overlay permission)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Overlay failed: {0}")]
    OverlayFailed(String),

    #[error("Stop failed: {0}")]
    StopFailed(String),

    #[error("Not supported on this host")]
    Unsupported,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HostResult<T> = Result<T, HostError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageEventKind {
    MoveToForeground,
    MoveToBackground,
}

/// One foreground/background transition reported by the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageEvent {
    pub target: TargetId,
    pub kind: UsageEventKind,
    /// Epoch milliseconds
    pub timestamp_ms: i64,
}

impl UsageEvent {
    pub fn foreground(target: impl Into<TargetId>, timestamp_ms: i64) -> Self {
        Self {
            target: target.into(),
            kind: UsageEventKind::MoveToForeground,
            timestamp_ms,
        }
    }

    pub fn background(target: impl Into<TargetId>, timestamp_ms: i64) -> Self {
        Self {
            target: target.into(),
            kind: UsageEventKind::MoveToBackground,
            timestamp_ms,
        }
    }
}

/// Aggregate foreground time of one target over a queried range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageStat {
    pub target: TargetId,
    pub foreground_ms: i64,
    /// Epoch milliseconds
    pub last_used_ms: i64,
}

/// A window currently visible on screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub target: TargetId,
    pub title: Option<String>,
    pub focused: bool,
}

/// An installed application as known to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledTarget {
    pub target: TargetId,
    pub label: String,
    pub system: bool,
    pub icon_base64: Option<String>,
}

/// A UI control located by the automation interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlHandle {
    /// Opaque host-specific handle
    pub id: String,
    pub label: String,
    pub class_name: String,
    pub clickable: bool,
    pub enabled: bool,
}

impl ControlHandle {
    pub fn is_button(&self) -> bool {
        self.class_name.ends_with("Button")
    }
}

/// Notifications from the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Window layout or focus changed
    WindowsChanged,
    TargetInstalled(TargetId),
    TargetRemoved(TargetId),
    BatteryChanged(u8),
}

/// Host adapter trait - implemented by platform-specific adapters
#[async_trait]
pub trait HostAdapter: Send + Sync {
    /// Get the capabilities of this host adapter
    fn capabilities(&self) -> &HostCapabilities;

    /// Foreground/background transitions with `start_ms <= timestamp <= end_ms`
    async fn query_usage_events(&self, start_ms: i64, end_ms: i64)
        -> HostResult<Vec<UsageEvent>>;

    /// Aggregate usage per target over `[start_ms, end_ms]`
    async fn query_usage_stats(&self, start_ms: i64, end_ms: i64) -> HostResult<Vec<UsageStat>>;

    /// Every window currently visible
    async fn visible_windows(&self) -> HostResult<Vec<WindowInfo>> {
        Err(HostError::Unsupported)
    }

    /// Cover the screen with the interruption overlay
    async fn show_overlay(&self, target: &TargetId, reason: &str) -> HostResult<()>;

    /// Remove the interruption overlay
    async fn hide_overlay(&self) -> HostResult<()>;

    /// Whether the interruption overlay is currently shown
    fn overlay_visible(&self) -> bool;

    /// Terminate every process belonging to `target`
    async fn force_stop(&self, target: &TargetId) -> HostResult<()>;

    /// Show a user-facing notification
    async fn notify(&self, _title: &str, _body: &str) -> HostResult<()> {
        Ok(())
    }

    /// Battery charge in percent, when available
    async fn battery_level(&self) -> Option<u8> {
        None
    }

    /// Installed applications, optionally with base64 icon payloads
    async fn installed_targets(&self, _include_icons: bool) -> HostResult<Vec<InstalledTarget>> {
        Ok(Vec::new())
    }

    /// Show or hide the agent's own launcher entry
    async fn set_launcher_visible(&self, _visible: bool) -> HostResult<()> {
        Err(HostError::Unsupported)
    }

    /// Apply a UI locale to agent-owned surfaces
    async fn apply_locale(&self, _code: &str) -> HostResult<()> {
        Ok(())
    }

    /// Subscribe to host events. Can only be taken once.
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<HostEvent>>;

    /// Optional: check if the host adapter is healthy
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Narrow UI-automation interface used to drive native confirmation flows
#[async_trait]
pub trait Automation: Send + Sync {
    /// Controls whose visible label equals `label`
    async fn find_controls_by_label(&self, label: &str) -> HostResult<Vec<ControlHandle>>;

    /// Click / activate a control
    async fn activate(&self, control: &ControlHandle) -> HostResult<()>;

    /// Whether this host can inspect controls at all
    fn is_available(&self) -> bool {
        true
    }
}

/// Automation for hosts without an accessibility tree: finds nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAutomation;

#[async_trait]
impl Automation for NoAutomation {
    async fn find_controls_by_label(&self, _label: &str) -> HostResult<Vec<ControlHandle>> {
        Ok(Vec::new())
    }

    async fn activate(&self, _control: &ControlHandle) -> HostResult<()> {
        Err(HostError::Unsupported)
    }

    fn is_available(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_detection() {
        let control = ControlHandle {
            id: "1".into(),
            label: "OK".into(),
            class_name: "android.widget.Button".into(),
            clickable: true,
            enabled: true,
        };
        assert!(control.is_button());
    }

    #[tokio::test]
    async fn no_automation_finds_nothing() {
        let found = NoAutomation.find_controls_by_label("OK").await.unwrap();
        assert!(found.is_empty());
        assert!(!NoAutomation.is_available());
    }
}
