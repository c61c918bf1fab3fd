//! Agent policy state as one immutable value

use guardian_util::TargetId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Category, CategoryLimit, Rule};

/// Device-wide lock. `until_ms == 0` means "until explicitly cleared".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalLock {
    pub locked: bool,
    pub until_ms: i64,
}

impl GlobalLock {
    pub fn is_active(&self, now_ms: i64) -> bool {
        self.locked && (self.until_ms == 0 || now_ms < self.until_ms)
    }

    /// A timed lock whose deadline has passed but has not been released yet
    pub fn has_lapsed(&self, now_ms: i64) -> bool {
        self.locked && self.until_ms != 0 && now_ms >= self.until_ms
    }
}

/// Identifier under which a quota warning is recorded
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WarningKey {
    Target(TargetId),
    Category(Category),
}

impl fmt::Display for WarningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningKey::Target(id) => write!(f, "app_{}", id),
            WarningKey::Category(c) => write!(f, "category_{}", c),
        }
    }
}

/// Everything the decision engine reads, captured atomically.
///
/// Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub category_limits: Vec<CategoryLimit>,
    #[serde(default)]
    pub global_lock: GlobalLock,
    #[serde(default)]
    pub temporary_unlock_until: i64,
    /// Per-target allowance timers: target -> expiresAt
    #[serde(default)]
    pub target_timers: BTreeMap<TargetId, i64>,
    /// Per-category allowance timers: category -> expiresAt
    #[serde(default)]
    pub category_timers: BTreeMap<Category, i64>,
    /// Category overrides set by the controller
    #[serde(default)]
    pub custom_categories: BTreeMap<TargetId, Category>,
    /// Warning identifier -> day key of the last warning
    #[serde(default)]
    pub warnings: BTreeMap<String, String>,
}

impl PolicySnapshot {
    pub fn rule_for(&self, target: &TargetId) -> Option<&Rule> {
        self.rules.iter().find(|r| &r.target == target)
    }

    pub fn category_limit(&self, category: Category) -> Option<&CategoryLimit> {
        self.category_limits.iter().find(|l| l.category == category)
    }

    pub fn temporary_unlock_active(&self, now_ms: i64) -> bool {
        now_ms < self.temporary_unlock_until
    }

    pub fn has_warned(&self, key: &WarningKey, day: &str) -> bool {
        self.warnings
            .get(&key.to_string())
            .is_some_and(|d| d == day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_lock_never_expires() {
        let lock = GlobalLock {
            locked: true,
            until_ms: 0,
        };
        assert!(lock.is_active(i64::MAX - 1));
        assert!(!lock.has_lapsed(i64::MAX - 1));
    }

    #[test]
    fn timed_lock_lapses() {
        let lock = GlobalLock {
            locked: true,
            until_ms: 1_000,
        };
        assert!(lock.is_active(999));
        assert!(!lock.is_active(1_000));
        assert!(lock.has_lapsed(1_000));
    }

    #[test]
    fn warning_keys() {
        assert_eq!(
            WarningKey::Target(TargetId::new("com.game")).to_string(),
            "app_com.game"
        );
        assert_eq!(
            WarningKey::Category(Category::Social).to_string(),
            "category_SOCIAL"
        );
    }

    #[test]
    fn warned_only_on_recorded_day() {
        let mut snapshot = PolicySnapshot::default();
        let key = WarningKey::Category(Category::Games);
        snapshot
            .warnings
            .insert(key.to_string(), "2025-01-01".into());

        assert!(snapshot.has_warned(&key, "2025-01-01"));
        assert!(!snapshot.has_warned(&key, "2025-01-02"));
    }

    #[test]
    fn snapshot_survives_json() {
        let mut snapshot = PolicySnapshot::default();
        snapshot.rules.push(Rule::new("x").blocked());
        snapshot.category_timers.insert(Category::Games, 5);
        snapshot.target_timers.insert(TargetId::new("y"), 9);

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: PolicySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
