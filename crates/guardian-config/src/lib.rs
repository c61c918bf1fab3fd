//! Configuration parsing and validation for guardian
//!
//! Supports:
//! - A versioned TOML config with `[agent]` and `[controller]` sections
//! - Hand-edited rule files (TOML) or wire-format rule sets (JSON)
//! - Validation with clear error messages

mod rules;
mod schema;
mod settings;
mod validation;

pub use rules::*;
pub use schema::*;
pub use settings::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Invalid rule set: {0:?}")]
    InvalidRuleSet(Vec<String>),

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Load the config at `path`, or defaults when the file does not exist
pub fn load_config_or_default(path: impl AsRef<Path>) -> ConfigResult<Config> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::info!(path = %path.display(), "No config file, using defaults");
        return Ok(Config::default());
    }
    load_config(path)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Config> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(Config::from_raw(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parse_minimal_config() {
        let config = parse_config("config_version = 1").unwrap();
        assert_eq!(config.agent.port, guardian_api::AGENT_PORT);
        assert_eq!(config.controller.max_requests_per_agent, 2);
    }

    #[test]
    fn parse_full_config() {
        let content = r#"
            config_version = 1

            [agent]
            port = 18080
            device_name = "Kid Tablet"
            enforcement_action = "terminate"
            whitelist = ["org.example.homework"]

            [agent.categories]
            "com.example.chat" = "SOCIAL"

            [controller]
            backoff_initial_ms = 1000
            backoff_factor = 2.0
            backoff_max_ms = 8000
        "#;

        let config = parse_config(content).unwrap();
        assert_eq!(config.agent.port, 18080);
        assert_eq!(config.agent.device_name.as_deref(), Some("Kid Tablet"));
        assert_eq!(config.agent.enforcement_action, EnforcementAction::Terminate);
        assert_eq!(config.agent.whitelist.len(), 1);
        assert_eq!(config.controller.backoff_initial, Duration::from_secs(1));
        assert_eq!(config.controller.backoff_factor, 2.0);
    }

    #[test]
    fn reject_wrong_version() {
        let result = parse_config("config_version = 99");
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_invalid_values() {
        let content = r#"
            config_version = 1

            [agent]
            enforcement_action = "shout"

            [controller]
            backoff_factor = 0.5
        "#;

        match parse_config(content) {
            Err(ConfigError::ValidationFailed { errors }) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.agent.sample_interval, Duration::from_secs(1));
    }
}
