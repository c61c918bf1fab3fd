//! Policy and status data model

use guardian_util::{DaysOfWeek, TargetId, TimeWindow, WallClock};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::ApiError;

/// Classification of targets used for aggregate quotas
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Social,
    Games,
    Education,
    Productivity,
    Entertainment,
    #[default]
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Social,
        Category::Games,
        Category::Education,
        Category::Productivity,
        Category::Entertainment,
        Category::Other,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Category::Social => "SOCIAL",
            Category::Games => "GAMES",
            Category::Education => "EDUCATION",
            Category::Productivity => "PRODUCTIVITY",
            Category::Entertainment => "ENTERTAINMENT",
            Category::Other => "OTHER",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ApiError::UnknownCategory(s.to_string()))
    }
}

fn all_days() -> Vec<u8> {
    vec![1, 2, 3, 4, 5, 6, 7]
}

/// Recurring block window as exchanged on the wire.
/// Days are ISO numbers (1 = Monday .. 7 = Sunday).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleWindow {
    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,
    #[serde(default = "all_days")]
    pub days_of_week: Vec<u8>,
}

impl ScheduleWindow {
    pub fn new(start: (u8, u8), end: (u8, u8), days: impl Into<Vec<u8>>) -> Self {
        Self {
            start_hour: start.0,
            start_minute: start.1,
            end_hour: end.0,
            end_minute: end.1,
            days_of_week: days.into(),
        }
    }

    /// Every day of the week
    pub fn daily(start: (u8, u8), end: (u8, u8)) -> Self {
        Self::new(start, end, all_days())
    }

    /// Convert into an evaluable window; `None` when any field is out of range
    pub fn to_window(&self) -> Option<TimeWindow> {
        let start = WallClock::new(self.start_hour, self.start_minute)?;
        let end = WallClock::new(self.end_hour, self.end_minute)?;
        Some(TimeWindow::new(
            DaysOfWeek::from_iso_days(self.days_of_week.iter().copied()),
            start,
            end,
        ))
    }

    pub fn contains(&self, dt: &DateTime<Local>) -> bool {
        self.to_window().is_some_and(|w| w.contains(dt))
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if WallClock::new(self.start_hour, self.start_minute).is_none() {
            problems.push(format!(
                "invalid start time {:02}:{:02}",
                self.start_hour, self.start_minute
            ));
        }
        if WallClock::new(self.end_hour, self.end_minute).is_none() {
            problems.push(format!(
                "invalid end time {:02}:{:02}",
                self.end_hour, self.end_minute
            ));
        }
        if self.days_of_week.is_empty() {
            problems.push("schedule has no days".into());
        }
        if let Some(day) = self.days_of_week.iter().find(|d| !(1..=7).contains(*d)) {
            problems.push(format!("day {} outside 1..7", day));
        }
        problems
    }
}

/// Per-target policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(rename = "packageName")]
    pub target: TargetId,

    /// Daily quota in milliseconds; 0 means no quota
    #[serde(rename = "maxDailyTimeMs", default)]
    pub daily_quota_ms: i64,

    /// One-shot block expiry (epoch ms); 0 means not set
    #[serde(rename = "blockEndTime", default)]
    pub block_until: i64,

    #[serde(rename = "isPermanentlyBlocked", default)]
    pub permanently_blocked: bool,

    #[serde(default)]
    pub category: Category,

    #[serde(rename = "isWhitelisted", default)]
    pub whitelisted: bool,

    /// Windows during which the target is blocked
    #[serde(default)]
    pub schedule: Vec<ScheduleWindow>,
}

impl Rule {
    pub fn new(target: impl Into<TargetId>) -> Self {
        Self {
            target: target.into(),
            daily_quota_ms: 0,
            block_until: 0,
            permanently_blocked: false,
            category: Category::Other,
            whitelisted: false,
            schedule: Vec::new(),
        }
    }

    pub fn blocked(mut self) -> Self {
        self.permanently_blocked = true;
        self
    }

    pub fn with_quota_ms(mut self, quota_ms: i64) -> Self {
        self.daily_quota_ms = quota_ms;
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_schedule(mut self, window: ScheduleWindow) -> Self {
        self.schedule.push(window);
        self
    }

    pub fn whitelisted(mut self) -> Self {
        self.whitelisted = true;
        self
    }

    /// Whether any schedule window covers `dt`
    pub fn in_schedule(&self, dt: &DateTime<Local>) -> bool {
        self.schedule.iter().any(|w| w.contains(dt))
    }
}

/// Aggregate daily quota for a category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLimit {
    pub category: Category,

    /// Daily quota in milliseconds; 0 means no quota
    #[serde(rename = "maxDailyTimeMs")]
    pub daily_quota_ms: i64,
}

impl CategoryLimit {
    pub fn new(category: Category, daily_quota_ms: i64) -> Self {
        Self {
            category,
            daily_quota_ms,
        }
    }
}

/// The unit of policy exchanged over the wire. Pushing one replaces all
/// rules and category limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub category_limits: Vec<CategoryLimit>,
    /// Timed device-wide lock (epoch ms); 0 means none requested
    #[serde(default)]
    pub global_lock_until: i64,
    /// Device-wide enforcement suspension (epoch ms); 0 means none
    #[serde(default)]
    pub temporary_unlock_until: i64,
}

impl RuleSet {
    /// Collect every structural problem; an empty list means the set is valid
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.target.is_empty() {
                problems.push("rule with empty target".into());
                continue;
            }
            if !seen.insert(&rule.target) {
                problems.push(format!("duplicate rule for '{}'", rule.target));
            }
            if rule.daily_quota_ms < 0 {
                problems.push(format!("'{}': negative daily quota", rule.target));
            }
            if rule.block_until < 0 {
                problems.push(format!("'{}': negative block expiry", rule.target));
            }
            for window in &rule.schedule {
                problems.extend(
                    window
                        .problems()
                        .into_iter()
                        .map(|p| format!("'{}': {}", rule.target, p)),
                );
            }
        }

        let mut seen_categories = HashSet::new();
        for limit in &self.category_limits {
            if !seen_categories.insert(limit.category) {
                problems.push(format!("duplicate limit for {}", limit.category));
            }
            if limit.daily_quota_ms < 0 {
                problems.push(format!("{}: negative daily quota", limit.category));
            }
        }

        problems
    }
}

/// Installed application as reported in device status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    #[serde(rename = "packageName")]
    pub target: TargetId,
    pub label: String,
    #[serde(default)]
    pub category: Category,
    #[serde(rename = "isSystem", default)]
    pub system: bool,
    #[serde(rename = "iconBase64", default, skip_serializing_if = "Option::is_none")]
    pub icon_base64: Option<String>,
}

/// Today's foreground usage of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppUsageLog {
    #[serde(rename = "packageName")]
    pub target: TargetId,
    #[serde(rename = "totalTimeInForeground")]
    pub foreground_ms: i64,
    #[serde(rename = "lastTimeUsed")]
    pub last_used_ms: i64,
    /// `yyyy-MM-dd`
    pub date: String,
    #[serde(default)]
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryUsage {
    pub category: Category,
    pub total_time_ms: i64,
    pub app_count: u32,
}

/// Foreground time within one local hour (0-23)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyUsage {
    pub hour: u8,
    pub usage_time_ms: i64,
}

/// Generated usage summary for one local day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsageReport {
    pub date: String,
    pub device_name: String,
    pub total_screen_time_ms: i64,
    pub app_usages: Vec<AppUsageLog>,
    /// Categories with non-zero usage only
    pub category_usages: Vec<CategoryUsage>,
    /// Top targets by foreground time
    pub most_used_apps: Vec<AppUsageLog>,
    #[serde(default)]
    pub hourly_breakdown: Vec<HourlyUsage>,
    #[serde(default)]
    pub blocked_attempts: u32,
}

/// Full agent status returned by `GET /stats`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStats {
    #[serde(default)]
    pub battery_level: Option<u8>,
    pub last_seen_timestamp: i64,
    #[serde(default)]
    pub usage_logs: Vec<AppUsageLog>,
    #[serde(default)]
    pub installed_apps: Vec<TargetInfo>,
    #[serde(default)]
    pub hourly_breakdown: Vec<HourlyUsage>,
    #[serde(default)]
    pub active_rules: Vec<Rule>,
    #[serde(default)]
    pub category_limits: Vec<CategoryLimit>,
    #[serde(default)]
    pub global_lock_until: i64,
    #[serde(default)]
    pub temporary_unlock_until: i64,
    #[serde(rename = "isLocked", default)]
    pub locked: bool,
    #[serde(rename = "isIconHidden", default)]
    pub icon_hidden: bool,
    #[serde(default)]
    pub app_timers: BTreeMap<TargetId, i64>,
    #[serde(default)]
    pub category_timers: BTreeMap<Category, i64>,
    #[serde(default)]
    pub device_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

impl DeviceStats {
    /// Sum of today's foreground time across all targets
    pub fn screen_time_ms(&self) -> i64 {
        self.usage_logs.iter().map(|l| l.foreground_ms).sum()
    }
}
