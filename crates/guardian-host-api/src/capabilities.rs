//! Host capabilities model

use serde::{Deserialize, Serialize};

/// Describes what a host adapter can do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapabilities {
    /// Can report foreground/background transition events
    pub can_query_usage_events: bool,

    /// Can report aggregate foreground time per target
    pub can_query_usage_stats: bool,

    /// Can cover the screen with an interruption overlay
    pub can_show_overlay: bool,

    /// Can terminate a target's processes
    pub can_force_stop: bool,

    /// Can list every visible window (multi-window, picture-in-picture)
    pub can_inspect_windows: bool,

    /// Can locate and activate UI controls by label
    pub can_automate_ui: bool,

    /// Can hide the agent's own launcher icon
    pub can_hide_launcher: bool,

    /// Can read the battery level
    pub can_report_battery: bool,
}

impl HostCapabilities {
    /// Nothing beyond usage accounting and process termination
    pub fn minimal() -> Self {
        Self {
            can_query_usage_events: true,
            can_query_usage_stats: true,
            can_show_overlay: false,
            can_force_stop: true,
            can_inspect_windows: false,
            can_automate_ui: false,
            can_hide_launcher: false,
            can_report_battery: false,
        }
    }

    /// Linux desktop session under Sway
    pub fn linux_sway() -> Self {
        Self {
            can_show_overlay: true,
            can_inspect_windows: true,
            can_hide_launcher: true,
            can_report_battery: true,
            ..Self::minimal()
        }
    }

    /// Everything, as offered by the mock host
    pub fn full() -> Self {
        Self {
            can_query_usage_events: true,
            can_query_usage_stats: true,
            can_show_overlay: true,
            can_force_stop: true,
            can_inspect_windows: true,
            can_automate_ui: true,
            can_hide_launcher: true,
            can_report_battery: true,
        }
    }
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self::minimal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sway_capabilities_extend_minimal() {
        let caps = HostCapabilities::linux_sway();
        assert!(caps.can_show_overlay);
        assert!(caps.can_force_stop);
        assert!(!caps.can_automate_ui);
    }
}
