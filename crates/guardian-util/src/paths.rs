//! Default paths for guardian components
//!
//! Paths are user-writable by default (no root required):
//! - Config: `$XDG_CONFIG_HOME/guardian/config.toml` or `~/.config/guardian/config.toml`
//! - Data: `$XDG_DATA_HOME/guardian` or `~/.local/share/guardian`

use std::path::PathBuf;

/// Environment variable for overriding the config file path
pub const GUARDIAN_CONFIG_ENV: &str = "GUARDIAN_CONFIG";

/// Environment variable for overriding the data directory
pub const GUARDIAN_DATA_DIR_ENV: &str = "GUARDIAN_DATA_DIR";

/// Application subdirectory name
const APP_DIR: &str = "guardian";

const CONFIG_FILENAME: &str = "config.toml";

/// Get the default configuration file path.
///
/// Order of precedence:
/// 1. `$GUARDIAN_CONFIG`
/// 2. `$XDG_CONFIG_HOME/guardian/config.toml`
/// 3. `~/.config/guardian/config.toml`
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(GUARDIAN_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$GUARDIAN_DATA_DIR`
/// 2. `$XDG_DATA_HOME/guardian`
/// 3. `~/.local/share/guardian`
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(GUARDIAN_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking `GUARDIAN_DATA_DIR`.
/// Used for config defaults where the env var is checked separately.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_contains_app_dir() {
        let path = data_dir_without_env();
        assert!(path.to_string_lossy().contains("guardian"));
    }

    #[test]
    fn config_path_is_toml() {
        let path = default_config_path();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("toml"));
    }
}
