//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Settings for the monitored device
    #[serde(default)]
    pub agent: RawAgentConfig,

    /// Settings for the controlling device
    #[serde(default)]
    pub controller: RawControllerConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawAgentConfig {
    pub port: Option<u16>,
    pub device_name: Option<String>,
    pub data_dir: Option<PathBuf>,

    /// Identifier under which the agent's own windows appear
    pub self_target: Option<String>,

    /// Targets hosting the native "terminate application" flow
    pub settings_targets: Option<Vec<String>>,

    /// Click through the force-stop flow in settings targets; needs a host
    /// with UI automation
    pub settings_automation: Option<bool>,

    /// Shell surfaces (bars, notification daemons) ignored by the window guard
    pub system_targets: Option<Vec<String>>,

    pub sample_interval_ms: Option<u64>,
    pub query_timeout_ms: Option<u64>,
    pub warning_threshold_minutes: Option<u64>,

    /// "overlay", "terminate" or "overlay_and_terminate"
    pub enforcement_action: Option<String>,

    /// Program shown as the interruption overlay
    pub overlay_command: Option<Vec<String>>,

    /// Targets that are never blocked, on top of the built-in set
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Category assignments: target -> category name
    #[serde(default)]
    pub categories: BTreeMap<String, String>,

    /// Minimum seconds between unlock requests for the same scope
    pub unlock_request_cooldown_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawControllerConfig {
    pub data_dir: Option<PathBuf>,
    pub request_timeout_ms: Option<u64>,
    pub max_requests_per_agent: Option<usize>,
    pub backoff_initial_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
    pub backoff_max_ms: Option<u64>,
    pub discovery_timeout_secs: Option<u64>,
}

/// Rule file edited by hand and pushed with `guardian-ctl rules push`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawRuleFile {
    #[serde(default)]
    pub rules: Vec<RawRule>,

    #[serde(default)]
    pub category_limits: Vec<RawCategoryLimit>,

    /// Minutes from now for a timed device lock
    pub lock_minutes: Option<u64>,

    /// Minutes from now for a device-wide unlock
    pub unlock_minutes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawRule {
    pub target: String,

    /// 0 or absent means no quota
    pub daily_quota_minutes: Option<u64>,

    /// Block until this local time today (HH:MM)
    pub block_until: Option<String>,

    #[serde(default)]
    pub permanently_blocked: bool,

    pub category: Option<String>,

    #[serde(default)]
    pub whitelisted: bool,

    #[serde(default)]
    pub schedule: Vec<RawTimeWindow>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawCategoryLimit {
    pub category: String,
    pub daily_quota_minutes: u64,
}

/// Time window
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawTimeWindow {
    /// Days of week: "weekdays", "weekends", "all", or list like ["mon", "tue"]
    #[serde(default = "default_days")]
    pub days: RawDays,

    /// Start time (HH:MM format)
    pub start: String,

    /// End time (HH:MM format); earlier than start for overnight windows
    pub end: String,
}

fn default_days() -> RawDays {
    RawDays::Preset("all".into())
}

/// Days specification
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawDays {
    Preset(String),
    List(Vec<String>),
}
