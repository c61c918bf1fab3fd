//! Decision engine: should the foreground target be interrupted?

use chrono::{DateTime, Local};
use guardian_api::{Category, PolicySnapshot, WarningKey};
use guardian_store::{AuditEvent, AuditEventType, Store};
use guardian_util::{TargetId, day_key};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{CategoryResolver, PolicyStore, UsageAccounting, UsageView};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowReason {
    Whitelisted,
    SelfTarget,
    TemporaryUnlock { until_ms: i64 },
    TargetTimer { expires_at: i64 },
    CategoryTimer { category: Category, expires_at: i64 },
    NoRestriction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    GlobalLock,
    TargetTimerExpired { expired_at: i64 },
    PermanentlyBlocked,
    BlockedUntil { until_ms: i64 },
    Scheduled,
    TargetQuota { used_ms: i64, quota_ms: i64 },
    CategoryTimerExpired { category: Category, expired_at: i64 },
    CategoryQuota { category: Category, used_ms: i64, quota_ms: i64 },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::GlobalLock => write!(f, "Device is locked"),
            BlockReason::TargetTimerExpired { .. } => write!(f, "App time is up"),
            BlockReason::PermanentlyBlocked => write!(f, "App is blocked"),
            BlockReason::BlockedUntil { .. } => write!(f, "App is blocked for now"),
            BlockReason::Scheduled => write!(f, "App is not allowed at this time"),
            BlockReason::TargetQuota { .. } => write!(f, "Daily limit reached"),
            BlockReason::CategoryTimerExpired { category, .. } => {
                write!(f, "{} time is up", category)
            }
            BlockReason::CategoryQuota { category, .. } => {
                write!(f, "Daily {} limit reached", category)
            }
        }
    }
}

/// A quota is about to run out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaWarning {
    pub key: WarningKey,
    pub remaining_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow(AllowReason),
    Block(BlockReason),
    Warn(QuotaWarning),
}

impl Decision {
    pub fn is_block(&self) -> bool {
        matches!(self, Decision::Block(_))
    }
}

/// Everything a decision reads besides the target and the clock
pub struct DecisionInput<'a> {
    pub snapshot: &'a PolicySnapshot,
    pub usage: &'a UsageView,
    pub resolver: &'a CategoryResolver,
    pub self_target: &'a TargetId,
    pub warning_threshold_ms: i64,
}

/// Pure precedence evaluation. Warnings already recorded for today are not
/// returned again; recording a new one is the caller's job.
pub fn evaluate(input: &DecisionInput<'_>, target: &TargetId, now: &DateTime<Local>) -> Decision {
    let snapshot = input.snapshot;
    let now_ms = now.timestamp_millis();
    let day = day_key(now);

    if input.resolver.is_whitelisted(snapshot, target) {
        return Decision::Allow(AllowReason::Whitelisted);
    }

    if target == input.self_target {
        return Decision::Allow(AllowReason::SelfTarget);
    }

    if snapshot.temporary_unlock_active(now_ms) {
        return Decision::Allow(AllowReason::TemporaryUnlock {
            until_ms: snapshot.temporary_unlock_until,
        });
    }

    if snapshot.global_lock.is_active(now_ms) {
        return Decision::Block(BlockReason::GlobalLock);
    }

    if let Some(&expires_at) = snapshot.target_timers.get(target) {
        return if now_ms < expires_at {
            Decision::Allow(AllowReason::TargetTimer { expires_at })
        } else {
            Decision::Block(BlockReason::TargetTimerExpired {
                expired_at: expires_at,
            })
        };
    }

    let mut pending: Option<QuotaWarning> = None;
    let exhausted = |key: WarningKey, used_ms: i64, quota_ms: i64, pending: &mut Option<QuotaWarning>| {
        quota_exhausted(input, &day, key, used_ms, quota_ms, pending)
    };

    if let Some(rule) = snapshot.rule_for(target) {
        if rule.permanently_blocked {
            return Decision::Block(BlockReason::PermanentlyBlocked);
        }
        if rule.block_until > now_ms {
            return Decision::Block(BlockReason::BlockedUntil {
                until_ms: rule.block_until,
            });
        }
        if rule.in_schedule(now) {
            return Decision::Block(BlockReason::Scheduled);
        }

        let used_ms = input.usage.target_ms(target);
        if exhausted(
            WarningKey::Target(target.clone()),
            used_ms,
            rule.daily_quota_ms,
            &mut pending,
        ) {
            return Decision::Block(BlockReason::TargetQuota {
                used_ms,
                quota_ms: rule.daily_quota_ms,
            });
        }
    }

    let category = input.resolver.resolve(snapshot, target);

    if let Some(&expires_at) = snapshot.category_timers.get(&category) {
        if now_ms >= expires_at {
            return Decision::Block(BlockReason::CategoryTimerExpired {
                category,
                expired_at: expires_at,
            });
        }
        return match pending {
            Some(warning) => Decision::Warn(warning),
            None => Decision::Allow(AllowReason::CategoryTimer {
                category,
                expires_at,
            }),
        };
    }

    if let Some(limit) = snapshot.category_limit(category) {
        let used_ms = input.usage.category_ms(category, input.resolver, snapshot);
        if exhausted(
            WarningKey::Category(category),
            used_ms,
            limit.daily_quota_ms,
            &mut pending,
        ) {
            return Decision::Block(BlockReason::CategoryQuota {
                category,
                used_ms,
                quota_ms: limit.daily_quota_ms,
            });
        }
    }

    match pending {
        Some(warning) => Decision::Warn(warning),
        None => Decision::Allow(AllowReason::NoRestriction),
    }
}

/// `true` once `used_ms` reaches a non-zero quota. Below it, records the
/// first unrecorded warning whose remaining time is within the threshold.
fn quota_exhausted(
    input: &DecisionInput<'_>,
    day: &str,
    key: WarningKey,
    used_ms: i64,
    quota_ms: i64,
    pending: &mut Option<QuotaWarning>,
) -> bool {
    if quota_ms <= 0 {
        return false;
    }
    if used_ms >= quota_ms {
        return true;
    }
    let remaining_ms = quota_ms - used_ms;
    if pending.is_none()
        && remaining_ms <= input.warning_threshold_ms
        && !input.snapshot.has_warned(&key, day)
    {
        *pending = Some(QuotaWarning { key, remaining_ms });
    }
    false
}

/// Binds the pure evaluation to live policy and usage
pub struct PolicyEngine {
    policy: Arc<PolicyStore>,
    usage: UsageAccounting,
    resolver: CategoryResolver,
    self_target: TargetId,
    warning_threshold: Duration,
    store: Option<Arc<dyn Store>>,
}

impl PolicyEngine {
    pub fn new(
        policy: Arc<PolicyStore>,
        usage: UsageAccounting,
        resolver: CategoryResolver,
        self_target: TargetId,
        warning_threshold: Duration,
    ) -> Self {
        Self {
            policy,
            usage,
            resolver,
            self_target,
            warning_threshold,
            store: None,
        }
    }

    /// Audit warnings to `store`
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn policy(&self) -> &Arc<PolicyStore> {
        &self.policy
    }

    pub fn usage(&self) -> &UsageAccounting {
        &self.usage
    }

    pub fn resolver(&self) -> &CategoryResolver {
        &self.resolver
    }

    pub fn self_target(&self) -> &TargetId {
        &self.self_target
    }

    /// Decide for `target` at `now`, reading today's usage from the host.
    /// When usage cannot be read, quotas are evaluated against zero usage.
    pub async fn decide(&self, target: &TargetId, now: &DateTime<Local>) -> Decision {
        let usage = self.usage_today(now).await;
        self.decide_with(target, &usage, now)
    }

    /// Whether `target` is blocked at `now`. Unlike `decide`, a pending
    /// warning is left for the next caller of `decide`.
    pub async fn is_blocked(&self, target: &TargetId, now: &DateTime<Local>) -> bool {
        let usage = self.usage_today(now).await;
        let snapshot = self.policy.snapshot();
        let input = DecisionInput {
            snapshot: &snapshot,
            usage: &usage,
            resolver: &self.resolver,
            self_target: &self.self_target,
            warning_threshold_ms: self.warning_threshold.as_millis() as i64,
        };
        evaluate(&input, target, now).is_block()
    }

    async fn usage_today(&self, now: &DateTime<Local>) -> UsageView {
        match self.usage.today(now).await {
            Ok(usage) => usage,
            Err(e) => {
                debug!(error = %e, "Usage unavailable, evaluating without quotas");
                UsageView::new(day_key(now), Vec::new())
            }
        }
    }

    /// Decide against a usage view the caller already holds. A returned
    /// warning has been recorded and will not be returned again today.
    pub fn decide_with(&self, target: &TargetId, usage: &UsageView, now: &DateTime<Local>) -> Decision {
        let snapshot = self.policy.snapshot();
        let input = DecisionInput {
            snapshot: &snapshot,
            usage,
            resolver: &self.resolver,
            self_target: &self.self_target,
            warning_threshold_ms: self.warning_threshold.as_millis() as i64,
        };

        let decision = evaluate(&input, target, now);

        if let Decision::Warn(warning) = &decision {
            if !self.policy.mark_warned(&warning.key, &day_key(now)) {
                // Another caller warned first
                return Decision::Allow(AllowReason::NoRestriction);
            }

            info!(
                target_id = %target,
                key = %warning.key,
                remaining_ms = warning.remaining_ms,
                "Quota warning issued"
            );

            if let Some(store) = &self.store
                && let Err(e) = store.append_audit(AuditEvent::new(AuditEventType::WarningIssued {
                    key: warning.key.to_string(),
                    remaining_ms: warning.remaining_ms,
                }))
            {
                warn!(error = %e, "Failed to audit warning");
            }
        }

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use guardian_api::{CategoryLimit, Rule, ScheduleWindow};
    use guardian_host_api::{MockHost, UsageStat};

    const MIN: i64 = 60_000;

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    fn t(id: &str) -> TargetId {
        TargetId::new(id)
    }

    fn usage(entries: &[(&str, i64)]) -> UsageView {
        UsageView::new(
            "2025-03-10",
            entries
                .iter()
                .map(|(id, ms)| UsageStat {
                    target: t(id),
                    foreground_ms: *ms,
                    last_used_ms: 0,
                })
                .collect(),
        )
    }

    fn decide(snapshot: &PolicySnapshot, usage: &UsageView, target: &str, now: &DateTime<Local>) -> Decision {
        let resolver = CategoryResolver::default();
        let self_target = t("guardian-agentd");
        let input = DecisionInput {
            snapshot,
            usage,
            resolver: &resolver,
            self_target: &self_target,
            warning_threshold_ms: 10 * MIN,
        };
        evaluate(&input, &t(target), now)
    }

    fn blocked_x() -> PolicySnapshot {
        PolicySnapshot {
            rules: vec![Rule::new("x").blocked()],
            ..Default::default()
        }
    }

    #[test]
    fn permanent_block_ignores_usage() {
        let snapshot = blocked_x();
        for used in [0, 5 * MIN, 500 * MIN] {
            assert_eq!(
                decide(&snapshot, &usage(&[("x", used)]), "x", &at(12, 0)),
                Decision::Block(BlockReason::PermanentlyBlocked)
            );
        }
    }

    #[test]
    fn temporary_unlock_beats_everything_but_whitelist() {
        let now = at(12, 0);
        let mut snapshot = blocked_x();
        snapshot.global_lock.locked = true;
        snapshot.temporary_unlock_until = now.timestamp_millis() + 1000;

        assert!(matches!(
            decide(&snapshot, &UsageView::default(), "x", &now),
            Decision::Allow(AllowReason::TemporaryUnlock { .. })
        ));

        // Lapsed unlock
        let later = at(12, 1);
        assert_eq!(
            decide(&snapshot, &UsageView::default(), "x", &later),
            Decision::Block(BlockReason::GlobalLock)
        );
    }

    #[test]
    fn whitelist_and_self_short_circuit_lock() {
        let mut snapshot = PolicySnapshot::default();
        snapshot.global_lock.locked = true;
        snapshot.rules.push(Rule::new("reader").whitelisted().blocked());

        let none = UsageView::default();
        assert_eq!(
            decide(&snapshot, &none, "com.android.phone", &at(12, 0)),
            Decision::Allow(AllowReason::Whitelisted)
        );
        assert_eq!(
            decide(&snapshot, &none, "reader", &at(12, 0)),
            Decision::Allow(AllowReason::Whitelisted)
        );
        assert_eq!(
            decide(&snapshot, &none, "guardian-agentd", &at(12, 0)),
            Decision::Allow(AllowReason::SelfTarget)
        );
        assert_eq!(
            decide(&snapshot, &none, "game", &at(12, 0)),
            Decision::Block(BlockReason::GlobalLock)
        );
    }

    #[test]
    fn target_timer_overrides_rules_then_forces_block() {
        let now = at(12, 0);
        let mut snapshot = blocked_x();
        snapshot
            .target_timers
            .insert(t("x"), now.timestamp_millis() + 1000);

        assert!(matches!(
            decide(&snapshot, &UsageView::default(), "x", &now),
            Decision::Allow(AllowReason::TargetTimer { .. })
        ));

        // Expired timer blocks even without any rule
        let mut snapshot = PolicySnapshot::default();
        snapshot
            .target_timers
            .insert(t("y"), now.timestamp_millis() + 1000);
        let later = now + chrono::Duration::seconds(2);
        assert!(matches!(
            decide(&snapshot, &UsageView::default(), "y", &later),
            Decision::Block(BlockReason::TargetTimerExpired { .. })
        ));
    }

    #[test]
    fn global_lock_beats_target_timer() {
        let now = at(12, 0);
        let mut snapshot = PolicySnapshot::default();
        snapshot.global_lock.locked = true;
        snapshot
            .target_timers
            .insert(t("x"), now.timestamp_millis() + 60_000);

        assert_eq!(
            decide(&snapshot, &UsageView::default(), "x", &now),
            Decision::Block(BlockReason::GlobalLock)
        );
    }

    #[test]
    fn overnight_schedule() {
        let snapshot = PolicySnapshot {
            rules: vec![Rule::new("x").with_schedule(ScheduleWindow::daily((22, 0), (6, 0)))],
            ..Default::default()
        };
        let none = UsageView::default();

        assert_eq!(
            decide(&snapshot, &none, "x", &at(23, 30)),
            Decision::Block(BlockReason::Scheduled)
        );
        assert_eq!(
            decide(&snapshot, &none, "x", &at(2, 0)),
            Decision::Block(BlockReason::Scheduled)
        );
        assert_eq!(
            decide(&snapshot, &none, "x", &at(12, 0)),
            Decision::Allow(AllowReason::NoRestriction)
        );
    }

    #[test]
    fn block_until_is_one_shot() {
        let now = at(12, 0);
        let mut rule = Rule::new("x");
        rule.block_until = now.timestamp_millis() + MIN;
        let snapshot = PolicySnapshot {
            rules: vec![rule],
            ..Default::default()
        };

        assert!(decide(&snapshot, &UsageView::default(), "x", &now).is_block());
        assert!(!decide(&snapshot, &UsageView::default(), "x", &at(12, 2)).is_block());
    }

    #[test]
    fn target_quota_and_warning_window() {
        let snapshot = PolicySnapshot {
            rules: vec![Rule::new("x").with_quota_ms(60 * MIN)],
            ..Default::default()
        };
        let now = at(12, 0);

        assert_eq!(
            decide(&snapshot, &usage(&[("x", 30 * MIN)]), "x", &now),
            Decision::Allow(AllowReason::NoRestriction)
        );
        assert_eq!(
            decide(&snapshot, &usage(&[("x", 55 * MIN)]), "x", &now),
            Decision::Warn(QuotaWarning {
                key: WarningKey::Target(t("x")),
                remaining_ms: 5 * MIN,
            })
        );
        assert_eq!(
            decide(&snapshot, &usage(&[("x", 60 * MIN)]), "x", &now),
            Decision::Block(BlockReason::TargetQuota {
                used_ms: 60 * MIN,
                quota_ms: 60 * MIN,
            })
        );
    }

    #[test]
    fn zero_quota_means_unlimited() {
        let snapshot = PolicySnapshot {
            rules: vec![Rule::new("x")],
            ..Default::default()
        };
        assert_eq!(
            decide(&snapshot, &usage(&[("x", 600 * MIN)]), "x", &at(12, 0)),
            Decision::Allow(AllowReason::NoRestriction)
        );
    }

    #[test]
    fn category_quota_after_target_rules() {
        let snapshot = PolicySnapshot {
            category_limits: vec![CategoryLimit::new(Category::Games, 30 * MIN)],
            ..Default::default()
        };
        let used = usage(&[("com.roblox.client", 20 * MIN), ("com.kiloo.subwaysurf", 10 * MIN)]);

        assert!(matches!(
            decide(&snapshot, &used, "com.roblox.client", &at(12, 0)),
            Decision::Block(BlockReason::CategoryQuota {
                category: Category::Games,
                used_ms,
                ..
            }) if used_ms == 30 * MIN
        ));
        // Different category is unaffected
        assert_eq!(
            decide(&snapshot, &used, "com.whatsapp", &at(12, 0)),
            Decision::Allow(AllowReason::NoRestriction)
        );
    }

    #[test]
    fn category_timer_overrides_category_quota() {
        let now = at(12, 0);
        let mut snapshot = PolicySnapshot {
            category_limits: vec![CategoryLimit::new(Category::Games, MIN)],
            ..Default::default()
        };
        snapshot
            .category_timers
            .insert(Category::Games, now.timestamp_millis() + MIN);
        let used = usage(&[("com.roblox.client", 5 * MIN)]);

        assert!(matches!(
            decide(&snapshot, &used, "com.roblox.client", &now),
            Decision::Allow(AllowReason::CategoryTimer { .. })
        ));
        assert!(matches!(
            decide(&snapshot, &used, "com.roblox.client", &at(12, 5)),
            Decision::Block(BlockReason::CategoryTimerExpired { .. })
        ));
    }

    #[test]
    fn pending_warning_yields_to_category_block() {
        let snapshot = PolicySnapshot {
            rules: vec![Rule::new("com.roblox.client").with_quota_ms(60 * MIN)],
            category_limits: vec![CategoryLimit::new(Category::Games, 50 * MIN)],
            ..Default::default()
        };
        let used = usage(&[("com.roblox.client", 55 * MIN)]);

        assert!(decide(&snapshot, &used, "com.roblox.client", &at(12, 0)).is_block());
    }

    #[test]
    fn recorded_warning_is_not_repeated() {
        let now = at(12, 0);
        let mut snapshot = PolicySnapshot {
            rules: vec![Rule::new("x").with_quota_ms(60 * MIN)],
            ..Default::default()
        };
        snapshot
            .warnings
            .insert("app_x".into(), day_key(&now));

        assert_eq!(
            decide(&snapshot, &usage(&[("x", 55 * MIN)]), "x", &now),
            Decision::Allow(AllowReason::NoRestriction)
        );
    }

    #[tokio::test]
    async fn engine_warns_exactly_once_per_day() {
        let policy = Arc::new(PolicyStore::new(PolicySnapshot {
            rules: vec![Rule::new("x").with_quota_ms(60 * MIN)],
            ..Default::default()
        }));
        let host = Arc::new(MockHost::new());
        let engine = PolicyEngine::new(
            policy,
            UsageAccounting::new(host.clone(), Duration::from_millis(100)),
            CategoryResolver::default(),
            t("guardian-agentd"),
            Duration::from_secs(600),
        );
        let now = at(12, 0);

        // Usage crosses into the warning window twice in the same day
        let mut warnings = 0;
        for used in [51 * MIN, 52 * MIN, 58 * MIN] {
            host.set_usage_stats(vec![UsageStat {
                target: t("x"),
                foreground_ms: used,
                last_used_ms: 0,
            }]);
            if matches!(engine.decide(&t("x"), &now).await, Decision::Warn(_)) {
                warnings += 1;
            }
        }
        assert_eq!(warnings, 1);

        // Next day warns again
        let tomorrow = now + chrono::Duration::days(1);
        assert!(matches!(
            engine.decide(&t("x"), &tomorrow).await,
            Decision::Warn(_)
        ));
    }
}
