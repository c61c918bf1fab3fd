//! Validated configuration types

use crate::schema::{RawAgentConfig, RawConfig, RawControllerConfig};
use crate::validation::parse_category;
use guardian_api::{AGENT_PORT, Category};
use guardian_util::{TargetId, default_data_dir};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// What the enforcement loop does to a blocked foreground target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EnforcementAction {
    /// Cover the screen with the interruption overlay
    #[default]
    Overlay,
    /// Kill the target's processes
    Terminate,
    OverlayAndTerminate,
}

impl EnforcementAction {
    pub fn shows_overlay(self) -> bool {
        matches!(self, Self::Overlay | Self::OverlayAndTerminate)
    }

    pub fn terminates(self) -> bool {
        matches!(self, Self::Terminate | Self::OverlayAndTerminate)
    }
}

impl FromStr for EnforcementAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "overlay" => Ok(Self::Overlay),
            "terminate" => Ok(Self::Terminate),
            "overlay_and_terminate" => Ok(Self::OverlayAndTerminate),
            other => Err(format!("unknown enforcement action '{}'", other)),
        }
    }
}

/// Validated configuration for both roles
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub agent: AgentConfig,
    pub controller: ControllerConfig,
}

impl Config {
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            agent: AgentConfig::from_raw(raw.agent),
            controller: ControllerConfig::from_raw(raw.controller),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub port: u16,
    /// Name advertised over mDNS; falls back to the host name
    pub device_name: Option<String>,
    pub data_dir: PathBuf,
    pub self_target: TargetId,
    pub settings_targets: Vec<TargetId>,
    /// Drive the force-stop flow in settings targets through UI automation
    pub settings_automation: bool,
    pub system_targets: Vec<TargetId>,
    pub sample_interval: Duration,
    pub query_timeout: Duration,
    pub warning_threshold: Duration,
    pub enforcement_action: EnforcementAction,
    pub overlay_command: Vec<String>,
    pub whitelist: BTreeSet<TargetId>,
    pub categories: BTreeMap<TargetId, Category>,
    pub unlock_request_cooldown: Duration,
}

impl AgentConfig {
    fn from_raw(raw: RawAgentConfig) -> Self {
        let defaults = Self::default();

        Self {
            port: raw.port.unwrap_or(defaults.port),
            device_name: raw.device_name.or(defaults.device_name),
            data_dir: raw.data_dir.unwrap_or(defaults.data_dir),
            self_target: raw
                .self_target
                .map(TargetId::new)
                .unwrap_or(defaults.self_target),
            settings_targets: raw
                .settings_targets
                .map(|v| v.into_iter().map(TargetId::new).collect())
                .unwrap_or(defaults.settings_targets),
            settings_automation: raw
                .settings_automation
                .unwrap_or(defaults.settings_automation),
            system_targets: raw
                .system_targets
                .map(|v| v.into_iter().map(TargetId::new).collect())
                .unwrap_or(defaults.system_targets),
            sample_interval: raw
                .sample_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.sample_interval),
            query_timeout: raw
                .query_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.query_timeout),
            warning_threshold: raw
                .warning_threshold_minutes
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(defaults.warning_threshold),
            enforcement_action: raw
                .enforcement_action
                .and_then(|a| a.parse().ok())
                .unwrap_or(defaults.enforcement_action),
            overlay_command: raw.overlay_command.unwrap_or(defaults.overlay_command),
            whitelist: raw.whitelist.into_iter().map(TargetId::new).collect(),
            categories: raw
                .categories
                .into_iter()
                .filter_map(|(target, cat)| {
                    parse_category(&cat).ok().map(|c| (TargetId::new(target), c))
                })
                .collect(),
            unlock_request_cooldown: raw
                .unlock_request_cooldown_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.unlock_request_cooldown),
        }
    }

    /// Path of the agent's SQLite database
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("agent.db")
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: AGENT_PORT,
            device_name: None,
            data_dir: default_data_dir(),
            self_target: TargetId::new("guardian-agentd"),
            settings_targets: vec![
                TargetId::new("gnome-control-center"),
                TargetId::new("org.gnome.Settings"),
                TargetId::new("org.kde.systemsettings"),
            ],
            settings_automation: false,
            system_targets: Vec::new(),
            sample_interval: Duration::from_millis(1000),
            query_timeout: Duration::from_millis(500),
            warning_threshold: Duration::from_secs(10 * 60),
            enforcement_action: EnforcementAction::Overlay,
            overlay_command: vec!["swaylock".into(), "-c".into(), "000000".into()],
            whitelist: BTreeSet::new(),
            categories: BTreeMap::new(),
            unlock_request_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
    /// Concurrent requests allowed against a single agent
    pub max_requests_per_agent: usize,
    pub backoff_initial: Duration,
    pub backoff_factor: f64,
    pub backoff_max: Duration,
    pub discovery_timeout: Duration,
}

impl ControllerConfig {
    fn from_raw(raw: RawControllerConfig) -> Self {
        let defaults = Self::default();

        Self {
            data_dir: raw.data_dir.unwrap_or(defaults.data_dir),
            request_timeout: raw
                .request_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            max_requests_per_agent: raw
                .max_requests_per_agent
                .unwrap_or(defaults.max_requests_per_agent),
            backoff_initial: raw
                .backoff_initial_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_initial),
            backoff_factor: raw.backoff_factor.unwrap_or(defaults.backoff_factor),
            backoff_max: raw
                .backoff_max_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_max),
            discovery_timeout: raw
                .discovery_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.discovery_timeout),
        }
    }

    /// Path of the controller's device cache
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("controller.db")
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            request_timeout: Duration::from_millis(5000),
            max_requests_per_agent: 2,
            backoff_initial: Duration::from_millis(5000),
            backoff_factor: 1.5,
            backoff_max: Duration::from_millis(60_000),
            discovery_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parsing() {
        assert_eq!(
            "overlay_and_terminate".parse::<EnforcementAction>().unwrap(),
            EnforcementAction::OverlayAndTerminate
        );
        assert!("explode".parse::<EnforcementAction>().is_err());

        assert!(EnforcementAction::Overlay.shows_overlay());
        assert!(!EnforcementAction::Overlay.terminates());
        assert!(EnforcementAction::Terminate.terminates());
    }

    #[test]
    fn raw_values_override_defaults() {
        let raw = RawAgentConfig {
            port: Some(9090),
            warning_threshold_minutes: Some(5),
            categories: [("com.chat".to_string(), "social".to_string())].into(),
            ..Default::default()
        };
        let agent = AgentConfig::from_raw(raw);

        assert_eq!(agent.port, 9090);
        assert_eq!(agent.warning_threshold, Duration::from_secs(300));
        assert_eq!(
            agent.categories.get(&TargetId::new("com.chat")),
            Some(&Category::Social)
        );
        assert_eq!(agent.sample_interval, Duration::from_secs(1));
        assert!(!agent.settings_automation);
    }

    #[test]
    fn default_settings_targets_are_desktop_apps() {
        let agent = AgentConfig::default();
        assert!(agent.settings_targets.contains(&TargetId::new("gnome-control-center")));
        assert!(agent.settings_targets.contains(&TargetId::new("org.kde.systemsettings")));
        assert!(
            agent
                .settings_targets
                .iter()
                .all(|t| !t.as_str().starts_with("com.android"))
        );
    }
}
