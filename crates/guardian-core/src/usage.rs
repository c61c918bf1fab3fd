//! Usage accounting from the host's usage-tracking source

use chrono::{DateTime, Local};
use guardian_api::{
    AppUsageLog, Category, CategoryUsage, DailyUsageReport, HourlyUsage, PolicySnapshot,
};
use guardian_host_api::{HostAdapter, UsageEvent, UsageEventKind, UsageStat};
use guardian_util::{TargetId, day_key, start_of_day};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::{CategoryResolver, CoreError, CoreResult};

/// Targets listed in a daily report's most-used section
pub const MOST_USED_LIMIT: usize = 5;

const HOUR_MS: i64 = 60 * 60 * 1000;

/// Today's foreground time per target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageView {
    /// Local day the totals belong to
    pub day: String,
    per_target: BTreeMap<TargetId, UsageStat>,
}

impl UsageView {
    pub fn new(day: impl Into<String>, stats: Vec<UsageStat>) -> Self {
        let mut per_target: BTreeMap<TargetId, UsageStat> = BTreeMap::new();
        for stat in stats.into_iter().filter(|s| s.foreground_ms > 0) {
            per_target
                .entry(stat.target.clone())
                .and_modify(|existing| {
                    existing.foreground_ms += stat.foreground_ms;
                    existing.last_used_ms = existing.last_used_ms.max(stat.last_used_ms);
                })
                .or_insert(stat);
        }
        Self {
            day: day.into(),
            per_target,
        }
    }

    pub fn target_ms(&self, target: &TargetId) -> i64 {
        self.per_target
            .get(target)
            .map(|s| s.foreground_ms)
            .unwrap_or(0)
    }

    /// Sum over every target that resolves to `category`
    pub fn category_ms(
        &self,
        category: Category,
        resolver: &CategoryResolver,
        snapshot: &PolicySnapshot,
    ) -> i64 {
        self.per_target
            .values()
            .filter(|s| resolver.resolve(snapshot, &s.target) == category)
            .map(|s| s.foreground_ms)
            .sum()
    }

    pub fn total_ms(&self) -> i64 {
        self.per_target.values().map(|s| s.foreground_ms).sum()
    }

    /// Per-target usage logs with resolved categories
    pub fn logs(&self, resolver: &CategoryResolver, snapshot: &PolicySnapshot) -> Vec<AppUsageLog> {
        self.per_target
            .values()
            .map(|s| AppUsageLog {
                target: s.target.clone(),
                foreground_ms: s.foreground_ms,
                last_used_ms: s.last_used_ms,
                date: self.day.clone(),
                category: resolver.resolve(snapshot, &s.target),
            })
            .collect()
    }
}

/// Split foreground intervals into 24 local-hour slots.
///
/// Intervals are opened by a move-to-foreground and closed by the matching
/// move-to-background; an interval still open at `end_ms` is closed there.
/// Time crossing an hour boundary is divided between both hours.
pub fn hourly_breakdown(events: &[UsageEvent], day_start: &DateTime<Local>, end_ms: i64) -> Vec<HourlyUsage> {
    let mut slots = [0i64; 24];
    let mut open: HashMap<&TargetId, i64> = HashMap::new();
    let day_start_ms = day_start.timestamp_millis();

    let mut add = |start: i64, end: i64| {
        let mut cursor = start.max(day_start_ms);
        let end = end.min(end_ms);
        while cursor < end {
            let hour = ((cursor - day_start_ms) / HOUR_MS) as usize;
            if hour >= 24 {
                break;
            }
            let slot_end = (day_start_ms + (hour as i64 + 1) * HOUR_MS).min(end);
            slots[hour] += slot_end - cursor;
            cursor = slot_end;
        }
    };

    let mut sorted: Vec<&UsageEvent> = events.iter().collect();
    sorted.sort_by_key(|e| e.timestamp_ms);

    for event in sorted {
        match event.kind {
            UsageEventKind::MoveToForeground => {
                open.entry(&event.target).or_insert(event.timestamp_ms);
            }
            UsageEventKind::MoveToBackground => {
                if let Some(start) = open.remove(&event.target) {
                    add(start, event.timestamp_ms);
                }
            }
        }
    }
    for start in open.into_values() {
        add(start, end_ms);
    }

    slots
        .iter()
        .enumerate()
        .map(|(hour, ms)| HourlyUsage {
            hour: hour as u8,
            usage_time_ms: *ms,
        })
        .collect()
}

/// Assemble a daily report from usage logs
pub fn build_report(
    date: String,
    device_name: String,
    logs: Vec<AppUsageLog>,
    hourly: Vec<HourlyUsage>,
    blocked_attempts: u32,
) -> DailyUsageReport {
    let category_usages = Category::ALL
        .into_iter()
        .filter_map(|category| {
            let in_category: Vec<_> = logs.iter().filter(|l| l.category == category).collect();
            let total: i64 = in_category.iter().map(|l| l.foreground_ms).sum();
            (total > 0).then(|| CategoryUsage {
                category,
                total_time_ms: total,
                app_count: in_category.len() as u32,
            })
        })
        .collect();

    let mut most_used = logs.clone();
    most_used.sort_by(|a, b| b.foreground_ms.cmp(&a.foreground_ms));
    most_used.truncate(MOST_USED_LIMIT);

    DailyUsageReport {
        date,
        device_name,
        total_screen_time_ms: logs.iter().map(|l| l.foreground_ms).sum(),
        app_usages: logs,
        category_usages,
        most_used_apps: most_used,
        hourly_breakdown: hourly,
        blocked_attempts,
    }
}

/// Reads the host usage source with bounded, non-retrying queries
pub struct UsageAccounting {
    host: Arc<dyn HostAdapter>,
    query_timeout: Duration,
}

impl UsageAccounting {
    pub fn new(host: Arc<dyn HostAdapter>, query_timeout: Duration) -> Self {
        Self {
            host,
            query_timeout,
        }
    }

    /// Per-target totals since local midnight
    pub async fn today(&self, now: &DateTime<Local>) -> CoreResult<UsageView> {
        let start = start_of_day(now).timestamp_millis();
        let stats = tokio::time::timeout(
            self.query_timeout,
            self.host.query_usage_stats(start, now.timestamp_millis()),
        )
        .await
        .map_err(|_| CoreError::Timeout("usage stats"))??;

        Ok(UsageView::new(day_key(now), stats))
    }

    /// 24-slot breakdown of today's foreground time
    pub async fn hourly(&self, now: &DateTime<Local>) -> CoreResult<Vec<HourlyUsage>> {
        let day_start = start_of_day(now);
        let now_ms = now.timestamp_millis();
        let events = tokio::time::timeout(
            self.query_timeout,
            self.host
                .query_usage_events(day_start.timestamp_millis(), now_ms),
        )
        .await
        .map_err(|_| CoreError::Timeout("usage events"))??;

        Ok(hourly_breakdown(&events, &day_start, now_ms))
    }
}
