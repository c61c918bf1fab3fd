//! Configuration validation

use crate::schema::{RawConfig, RawDays, RawRule, RawRuleFile, RawTimeWindow};
use crate::EnforcementAction;
use guardian_api::Category;
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Rule '{target}': {message}")]
    RuleError { target: String, message: String },

    #[error("Duplicate rule for target: {0}")]
    DuplicateTarget(String),

    #[error("Duplicate limit for category: {0}")]
    DuplicateCategoryLimit(String),

    #[error("Invalid time format '{value}': {message}")]
    InvalidTimeFormat { value: String, message: String },

    #[error("Invalid day specification: {0}")]
    InvalidDaySpec(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Agent config error: {0}")]
    AgentError(String),

    #[error("Controller config error: {0}")]
    ControllerError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let agent = &config.agent;

    if agent.port == Some(0) {
        errors.push(ValidationError::AgentError("port cannot be 0".into()));
    }
    if let Some(name) = &agent.device_name
        && name.trim().is_empty()
    {
        errors.push(ValidationError::AgentError("device_name cannot be empty".into()));
    }
    if agent.sample_interval_ms == Some(0) {
        errors.push(ValidationError::AgentError(
            "sample_interval_ms must be positive".into(),
        ));
    }
    if agent.query_timeout_ms == Some(0) {
        errors.push(ValidationError::AgentError(
            "query_timeout_ms must be positive".into(),
        ));
    }
    if let Some(action) = &agent.enforcement_action
        && action.parse::<EnforcementAction>().is_err()
    {
        errors.push(ValidationError::AgentError(format!(
            "unknown enforcement_action '{}'",
            action
        )));
    }
    if let Some(argv) = &agent.overlay_command
        && argv.first().is_none_or(|p| p.is_empty())
    {
        errors.push(ValidationError::AgentError(
            "overlay_command cannot be empty".into(),
        ));
    }
    for (target, category) in &agent.categories {
        if parse_category(category).is_err() {
            errors.push(ValidationError::AgentError(format!(
                "category '{}' for '{}' is unknown",
                category, target
            )));
        }
    }

    let controller = &config.controller;
    if controller.max_requests_per_agent == Some(0) {
        errors.push(ValidationError::ControllerError(
            "max_requests_per_agent must be at least 1".into(),
        ));
    }
    if let Some(factor) = controller.backoff_factor
        && !(factor >= 1.0 && factor.is_finite())
    {
        errors.push(ValidationError::ControllerError(
            "backoff_factor must be >= 1.0".into(),
        ));
    }
    if let (Some(initial), Some(max)) = (controller.backoff_initial_ms, controller.backoff_max_ms)
        && initial > max
    {
        errors.push(ValidationError::ControllerError(format!(
            "backoff_initial_ms {} exceeds backoff_max_ms {}",
            initial, max
        )));
    }

    errors
}

/// Validate a raw rule file
pub fn validate_rule_file(file: &RawRuleFile) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut seen_targets = HashSet::new();
    for rule in &file.rules {
        if !seen_targets.insert(rule.target.as_str()) {
            errors.push(ValidationError::DuplicateTarget(rule.target.clone()));
        }
        errors.extend(validate_rule(rule));
    }

    let mut seen_categories = HashSet::new();
    for limit in &file.category_limits {
        match parse_category(&limit.category) {
            Ok(category) => {
                if !seen_categories.insert(category) {
                    errors.push(ValidationError::DuplicateCategoryLimit(
                        limit.category.clone(),
                    ));
                }
            }
            Err(e) => errors.push(e),
        }
    }

    errors
}

fn validate_rule(rule: &RawRule) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if rule.target.trim().is_empty() {
        errors.push(ValidationError::RuleError {
            target: rule.target.clone(),
            message: "target cannot be empty".into(),
        });
    }

    if let Some(category) = &rule.category
        && let Err(e) = parse_category(category)
    {
        errors.push(e);
    }

    if let Some(until) = &rule.block_until
        && let Err(message) = parse_time(until)
    {
        errors.push(ValidationError::InvalidTimeFormat {
            value: until.clone(),
            message,
        });
    }

    for window in &rule.schedule {
        errors.extend(validate_time_window(window, &rule.target));
    }

    errors
}

fn validate_time_window(window: &RawTimeWindow, target: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    match parse_days(&window.days) {
        Ok(days) if days.is_empty() => errors.push(ValidationError::RuleError {
            target: target.to_string(),
            message: "schedule window has no days".into(),
        }),
        Ok(_) => {}
        Err(e) => errors.push(ValidationError::InvalidDaySpec(e)),
    }

    for value in [&window.start, &window.end] {
        if let Err(message) = parse_time(value) {
            errors.push(ValidationError::InvalidTimeFormat {
                value: value.clone(),
                message,
            });
        }
    }

    errors
}

/// Parse HH:MM time format
pub fn parse_time(s: &str) -> Result<(u8, u8), String> {
    let (hour, minute) = s
        .split_once(':')
        .ok_or_else(|| "Expected HH:MM format".to_string())?;

    let hour: u8 = hour.trim().parse().map_err(|_| "Invalid hour".to_string())?;
    let minute: u8 = minute
        .trim()
        .parse()
        .map_err(|_| "Invalid minute".to_string())?;

    if hour >= 24 {
        return Err("Hour must be 0-23".into());
    }
    if minute >= 60 {
        return Err("Minute must be 0-59".into());
    }

    Ok((hour, minute))
}

/// Parse a days specification into ISO day numbers (1 = Monday .. 7 = Sunday)
pub fn parse_days(days: &RawDays) -> Result<Vec<u8>, String> {
    match days {
        RawDays::Preset(preset) => match preset.to_lowercase().as_str() {
            "all" | "every" | "daily" => Ok((1..=7).collect()),
            "weekdays" => Ok((1..=5).collect()),
            "weekends" => Ok(vec![6, 7]),
            other => Err(format!("Unknown day preset: {}", other)),
        },
        RawDays::List(list) => {
            let mut parsed = Vec::with_capacity(list.len());
            for day in list {
                let iso = match day.to_lowercase().as_str() {
                    "mon" | "monday" => 1,
                    "tue" | "tuesday" => 2,
                    "wed" | "wednesday" => 3,
                    "thu" | "thursday" => 4,
                    "fri" | "friday" => 5,
                    "sat" | "saturday" => 6,
                    "sun" | "sunday" => 7,
                    other => return Err(format!("Unknown day: {}", other)),
                };
                if !parsed.contains(&iso) {
                    parsed.push(iso);
                }
            }
            parsed.sort_unstable();
            Ok(parsed)
        }
    }
}

pub fn parse_category(s: &str) -> Result<Category, ValidationError> {
    s.parse()
        .map_err(|_| ValidationError::UnknownCategory(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RawCategoryLimit;

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("14:30").unwrap(), (14, 30));
        assert_eq!(parse_time("00:00").unwrap(), (0, 0));
        assert_eq!(parse_time("23:59").unwrap(), (23, 59));

        assert!(parse_time("24:00").is_err());
        assert!(parse_time("12:60").is_err());
        assert!(parse_time("invalid").is_err());
    }

    #[test]
    fn test_parse_days() {
        assert_eq!(
            parse_days(&RawDays::Preset("weekdays".into())).unwrap(),
            vec![1, 2, 3, 4, 5]
        );
        assert_eq!(parse_days(&RawDays::Preset("weekends".into())).unwrap(), vec![6, 7]);
        assert_eq!(parse_days(&RawDays::Preset("all".into())).unwrap().len(), 7);
        assert_eq!(
            parse_days(&RawDays::List(vec!["fri".into(), "mon".into(), "wed".into()])).unwrap(),
            vec![1, 3, 5]
        );
        assert!(parse_days(&RawDays::List(vec!["someday".into()])).is_err());
    }

    #[test]
    fn test_duplicate_target_detection() {
        let rule = RawRule {
            target: "com.game".into(),
            daily_quota_minutes: Some(30),
            block_until: None,
            permanently_blocked: false,
            category: None,
            whitelisted: false,
            schedule: vec![],
        };
        let file = RawRuleFile {
            rules: vec![rule.clone(), rule],
            ..Default::default()
        };

        let errors = validate_rule_file(&file);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateTarget(_))));
    }

    #[test]
    fn test_unknown_category_limit() {
        let file = RawRuleFile {
            category_limits: vec![RawCategoryLimit {
                category: "sports".into(),
                daily_quota_minutes: 10,
            }],
            ..Default::default()
        };

        let errors = validate_rule_file(&file);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnknownCategory(_))));
    }
}
