//! Rule files: the hand-edited form of a [`RuleSet`]

use crate::schema::{RawRule, RawRuleFile};
use crate::validation::{parse_category, parse_days, parse_time, validate_rule_file};
use crate::{ConfigError, ConfigResult};
use chrono::{DateTime, Duration, Local};
use guardian_api::{Category, CategoryLimit, Rule, RuleSet, ScheduleWindow};
use guardian_util::{TargetId, start_of_day};
use std::path::Path;

const MINUTE_MS: i64 = 60_000;

/// Load a rule file. `.json` files hold a wire-format rule set; anything
/// else is parsed as a TOML rule file relative to `now`.
pub fn load_rule_set(path: impl AsRef<Path>, now: &DateTime<Local>) -> ConfigResult<RuleSet> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;

    let rule_set = if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json")) {
        serde_json::from_str::<RuleSet>(&content)?
    } else {
        parse_rule_file(&content, now)?
    };

    let problems = rule_set.problems();
    if !problems.is_empty() {
        return Err(ConfigError::InvalidRuleSet(problems));
    }

    tracing::debug!(
        path = %path.display(),
        rules = rule_set.rules.len(),
        category_limits = rule_set.category_limits.len(),
        "Loaded rule set"
    );

    Ok(rule_set)
}

/// Parse and validate a TOML rule file
pub fn parse_rule_file(content: &str, now: &DateTime<Local>) -> ConfigResult<RuleSet> {
    let raw: RawRuleFile = toml::from_str(content)?;

    let errors = validate_rule_file(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(rule_set_from_raw(raw, now))
}

/// Convert a validated rule file. Relative durations are anchored at `now`.
pub fn rule_set_from_raw(raw: RawRuleFile, now: &DateTime<Local>) -> RuleSet {
    let now_ms = now.timestamp_millis();
    let offset = |minutes: Option<u64>| {
        minutes
            .filter(|m| *m > 0)
            .map(|m| now_ms.saturating_add(i64::try_from(m).unwrap_or(i64::MAX).saturating_mul(MINUTE_MS)))
            .unwrap_or(0)
    };

    RuleSet {
        rules: raw.rules.into_iter().map(|r| convert_rule(r, now)).collect(),
        category_limits: raw
            .category_limits
            .into_iter()
            .filter_map(|l| {
                let category = parse_category(&l.category).ok()?;
                Some(CategoryLimit::new(
                    category,
                    l.daily_quota_minutes as i64 * MINUTE_MS,
                ))
            })
            .collect(),
        global_lock_until: offset(raw.lock_minutes),
        temporary_unlock_until: offset(raw.unlock_minutes),
    }
}

fn convert_rule(raw: RawRule, now: &DateTime<Local>) -> Rule {
    let block_until = raw
        .block_until
        .as_deref()
        .and_then(|s| parse_time(s).ok())
        .map(|(h, m)| {
            let at = start_of_day(now) + Duration::hours(h as i64) + Duration::minutes(m as i64);
            at.timestamp_millis()
        })
        .unwrap_or(0);

    let schedule = raw
        .schedule
        .iter()
        .filter_map(|w| {
            let days = parse_days(&w.days).ok()?;
            let start = parse_time(&w.start).ok()?;
            let end = parse_time(&w.end).ok()?;
            Some(ScheduleWindow::new(start, end, days))
        })
        .collect();

    Rule {
        target: TargetId::new(raw.target),
        daily_quota_ms: raw.daily_quota_minutes.unwrap_or(0) as i64 * MINUTE_MS,
        block_until,
        permanently_blocked: raw.permanently_blocked,
        category: raw
            .category
            .as_deref()
            .and_then(|c| parse_category(c).ok())
            .unwrap_or(Category::Other),
        whitelisted: raw.whitelisted,
        schedule,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn toml_rule_file_converts_to_millis() {
        let content = r#"
            lock_minutes = 30

            [[rules]]
            target = "com.example.game"
            daily_quota_minutes = 45
            category = "games"
            block_until = "18:30"

            [[rules.schedule]]
            days = "weekdays"
            start = "21:00"
            end = "07:00"

            [[category_limits]]
            category = "social"
            daily_quota_minutes = 60
        "#;

        let set = parse_rule_file(content, &noon()).unwrap();
        let rule = &set.rules[0];

        assert_eq!(rule.daily_quota_ms, 45 * MINUTE_MS);
        assert_eq!(rule.category, Category::Games);
        assert_eq!(
            rule.block_until,
            Local
                .with_ymd_and_hms(2025, 3, 10, 18, 30, 0)
                .unwrap()
                .timestamp_millis()
        );
        assert_eq!(rule.schedule[0].days_of_week, vec![1, 2, 3, 4, 5]);
        assert_eq!(rule.schedule[0].start_hour, 21);

        assert_eq!(set.category_limits[0].category, Category::Social);
        assert_eq!(set.global_lock_until, noon().timestamp_millis() + 30 * MINUTE_MS);
        assert_eq!(set.temporary_unlock_until, 0);
    }

    #[test]
    fn invalid_rule_file_is_rejected() {
        let content = r#"
            [[rules]]
            target = "x"
            block_until = "25:00"
        "#;

        assert!(matches!(
            parse_rule_file(content, &noon()),
            Err(ConfigError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn json_rule_set_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"rules":[{{"packageName":"a","maxDailyTimeMs":-5}}]}}"#
        )
        .unwrap();

        assert!(matches!(
            load_rule_set(&path, &noon()),
            Err(ConfigError::InvalidRuleSet(_))
        ));
    }

    #[test]
    fn json_rule_set_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"{"rules":[{"packageName":"a","maxDailyTimeMs":60000}],"categoryLimits":[]}"#,
        )
        .unwrap();

        let set = load_rule_set(&path, &noon()).unwrap();
        assert_eq!(set.rules[0].target.as_str(), "a");
    }
}
