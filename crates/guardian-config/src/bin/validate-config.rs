//! Config validation CLI tool
//!
//! Validates a guardian configuration file or rule file and reports any errors.

use guardian_api::{Rule, RuleSet};
use guardian_config::{Config, ConfigError};
use guardian_util::{default_config_path, format_duration, now};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let (rules_mode, path) = match args.get(1).map(String::as_str) {
        Some("--rules") => match args.get(2) {
            Some(path) => (true, PathBuf::from(path)),
            None => return usage(),
        },
        Some(path) => (false, PathBuf::from(path)),
        None => return usage(),
    };

    if !path.exists() {
        eprintln!("Error: File not found: {}", path.display());
        return ExitCode::from(1);
    }

    let result = if rules_mode {
        guardian_config::load_rule_set(&path, &now()).map(|set| print_rule_set(&set))
    } else {
        guardian_config::load_config(&path).map(|config| print_config(&path, &config))
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("✗ Validation failed");
            eprintln!();
            report_error(&e);
            ExitCode::from(1)
        }
    }
}

fn usage() -> ExitCode {
    let default_path = default_config_path();
    eprintln!("Usage: validate-config [config-file]");
    eprintln!("       validate-config --rules <rule-file>");
    eprintln!();
    eprintln!("Validates a guardian configuration file or rule file.");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  validate-config {}", default_path.display());
    eprintln!("  validate-config --rules bedtime.toml");
    ExitCode::from(2)
}

fn print_config(path: &Path, config: &Config) {
    println!("✓ Configuration is valid: {}", path.display());
    println!();
    println!("Agent:");
    println!("  Port: {}", config.agent.port);
    if let Some(name) = &config.agent.device_name {
        println!("  Device name: {}", name);
    }
    println!("  Data dir: {}", config.agent.data_dir.display());
    println!("  Enforcement: {:?}", config.agent.enforcement_action);
    println!(
        "  Warning threshold: {}",
        format_duration(config.agent.warning_threshold)
    );
    println!("  Whitelisted targets: {}", config.agent.whitelist.len());
    println!("  Category assignments: {}", config.agent.categories.len());
    println!();
    println!("Controller:");
    println!(
        "  Request timeout: {}",
        format_duration(config.controller.request_timeout)
    );
    println!(
        "  Backoff: {} x{} up to {}",
        format_duration(config.controller.backoff_initial),
        config.controller.backoff_factor,
        format_duration(config.controller.backoff_max)
    );
}

fn print_rule_set(set: &RuleSet) {
    println!("✓ Rule file is valid");
    println!();
    println!("Rules ({}):", set.rules.len());
    for rule in &set.rules {
        println!("  - {}", describe_rule(rule));
    }
    if !set.category_limits.is_empty() {
        println!();
        println!("Category limits:");
        for limit in &set.category_limits {
            println!(
                "  - {}: {}",
                limit.category,
                format_duration(Duration::from_millis(limit.daily_quota_ms as u64))
            );
        }
    }
}

fn describe_rule(rule: &Rule) -> String {
    let mut traits = Vec::new();
    if rule.permanently_blocked {
        traits.push("blocked".to_string());
    }
    if rule.whitelisted {
        traits.push("whitelisted".to_string());
    }
    if rule.daily_quota_ms > 0 {
        traits.push(format!(
            "quota {}",
            format_duration(Duration::from_millis(rule.daily_quota_ms as u64))
        ));
    }
    if !rule.schedule.is_empty() {
        traits.push(format!("{} schedule window(s)", rule.schedule.len()));
    }
    format!("{} [{}]: {}", rule.target, rule.category, traits.join(", "))
}

fn report_error(e: &ConfigError) {
    match e {
        ConfigError::ReadError(io_err) => eprintln!("Failed to read file: {}", io_err),
        ConfigError::ParseError(parse_err) => {
            eprintln!("TOML parse error:");
            eprintln!("  {}", parse_err);
        }
        ConfigError::JsonError(parse_err) => {
            eprintln!("JSON parse error:");
            eprintln!("  {}", parse_err);
        }
        ConfigError::ValidationFailed { errors } => {
            eprintln!("Validation errors ({}):", errors.len());
            for err in errors {
                eprintln!("  - {}", err);
            }
        }
        ConfigError::InvalidRuleSet(problems) => {
            eprintln!("Rule set problems ({}):", problems.len());
            for problem in problems {
                eprintln!("  - {}", problem);
            }
        }
        ConfigError::UnsupportedVersion(ver) => eprintln!(
            "Unsupported config version: {} (expected {})",
            ver,
            guardian_config::CURRENT_CONFIG_VERSION
        ),
    }
}
