//! Plain-text rendering of agent state for the terminal

use chrono::{Local, TimeZone};
use guardian_api::{DailyUsageReport, DeviceStats, Event, EventType, UnlockScope};
use guardian_net::{DeviceSummary, PushUpdate};
use guardian_store::DeviceRecord;
use guardian_util::format_duration;
use std::fmt::Write;
use std::time::Duration;

fn ms(value: i64) -> String {
    format_duration(Duration::from_millis(value.max(0) as u64))
}

/// Local wall-clock time of an epoch-millisecond timestamp
pub fn timestamp(epoch_ms: i64) -> String {
    match Local.timestamp_millis_opt(epoch_ms).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => "-".into(),
    }
}

/// Time left until `expires_at`, or `None` once it has passed
fn remaining(expires_at: i64, now_ms: i64) -> Option<String> {
    (expires_at > now_ms).then(|| ms(expires_at - now_ms))
}

pub fn device_line(record: &DeviceRecord) -> String {
    format!(
        "{:<24} {:<22} last seen {}",
        record.display_name(),
        record.authority(),
        timestamp(record.last_seen_ms)
    )
}

pub fn summary_line(summary: &DeviceSummary) -> String {
    let name = summary.record.display_name();
    if !summary.online {
        return format!(
            "{:<24} offline ({})",
            name,
            summary.error.as_deref().unwrap_or("unreachable")
        );
    }

    let battery = summary
        .battery_level
        .map(|b| format!("{}%", b))
        .unwrap_or_else(|| "-".into());
    format!(
        "{:<24} {:<8} battery {:<5} rules {:<3} screen time {}",
        name,
        if summary.locked { "locked" } else { "open" },
        battery,
        summary.rule_count,
        ms(summary.screen_time_ms)
    )
}

/// Detailed status of one agent
pub fn stats(stats: &DeviceStats, now_ms: i64) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Device:      {}", stats.device_name);
    let _ = writeln!(
        out,
        "Battery:     {}",
        stats
            .battery_level
            .map(|b| format!("{}%", b))
            .unwrap_or_else(|| "unknown".into())
    );
    let lock = match remaining(stats.global_lock_until, now_ms) {
        Some(left) if stats.locked => format!("locked ({} left)", left),
        _ if stats.locked => "locked".into(),
        _ => "open".into(),
    };
    let _ = writeln!(out, "Lock:        {}", lock);
    if let Some(left) = remaining(stats.temporary_unlock_until, now_ms) {
        let _ = writeln!(out, "Unlocked:    {} left", left);
    }
    if stats.icon_hidden {
        let _ = writeln!(out, "Launcher:    hidden");
    }
    if let Some(code) = &stats.language_code {
        let _ = writeln!(out, "Language:    {}", code);
    }
    let _ = writeln!(out, "Screen time: {}", ms(stats.screen_time_ms()));

    if !stats.active_rules.is_empty() {
        let _ = writeln!(out, "\nRules:");
        for rule in &stats.active_rules {
            let mut traits = Vec::new();
            if rule.permanently_blocked {
                traits.push("blocked".to_string());
            }
            if rule.daily_quota_ms > 0 {
                traits.push(format!("quota {}", ms(rule.daily_quota_ms)));
            }
            if let Some(left) = remaining(rule.block_until, now_ms) {
                traits.push(format!("blocked for {}", left));
            }
            if !rule.schedule.is_empty() {
                traits.push(format!("{} schedule window(s)", rule.schedule.len()));
            }
            if rule.whitelisted {
                traits.push("whitelisted".into());
            }
            let _ = writeln!(out, "  {:<32} {:<14} {}", rule.target, rule.category, traits.join(", "));
        }
    }

    if !stats.category_limits.is_empty() {
        let _ = writeln!(out, "\nCategory limits:");
        for limit in &stats.category_limits {
            let _ = writeln!(out, "  {:<14} {}", limit.category, ms(limit.daily_quota_ms));
        }
    }

    let timers: Vec<String> = stats
        .app_timers
        .iter()
        .filter_map(|(t, at)| remaining(*at, now_ms).map(|left| format!("{} ({})", t, left)))
        .chain(
            stats
                .category_timers
                .iter()
                .filter_map(|(c, at)| remaining(*at, now_ms).map(|left| format!("{} ({})", c, left))),
        )
        .collect();
    if !timers.is_empty() {
        let _ = writeln!(out, "\nTimers:      {}", timers.join(", "));
    }

    let mut usage = stats.usage_logs.clone();
    usage.sort_by(|a, b| b.foreground_ms.cmp(&a.foreground_ms));
    if !usage.is_empty() {
        let _ = writeln!(out, "\nUsage today:");
        for log in usage {
            let _ = writeln!(out, "  {:<32} {:<14} {}", log.target, log.category, ms(log.foreground_ms));
        }
    }

    out
}

pub fn report(report: &DailyUsageReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "{} on {}", report.device_name, report.date);
    let _ = writeln!(out, "Screen time:      {}", ms(report.total_screen_time_ms));
    let _ = writeln!(out, "Blocked attempts: {}", report.blocked_attempts);

    if !report.most_used_apps.is_empty() {
        let _ = writeln!(out, "\nMost used:");
        for log in &report.most_used_apps {
            let _ = writeln!(out, "  {:<32} {}", log.target, ms(log.foreground_ms));
        }
    }

    if !report.category_usages.is_empty() {
        let _ = writeln!(out, "\nBy category:");
        for usage in &report.category_usages {
            let _ = writeln!(
                out,
                "  {:<14} {:<10} {} app(s)",
                usage.category,
                ms(usage.total_time_ms),
                usage.app_count
            );
        }
    }

    let busy: Vec<String> = report
        .hourly_breakdown
        .iter()
        .filter(|h| h.usage_time_ms > 0)
        .map(|h| format!("{:02}h {}", h.hour, ms(h.usage_time_ms)))
        .collect();
    if !busy.is_empty() {
        let _ = writeln!(out, "\nBy hour:          {}", busy.join(", "));
    }

    out
}

pub fn event(event: &Event) -> String {
    let payload = event.payload.as_deref().unwrap_or("");
    match event.event_type {
        EventType::BatteryChanged => format!("battery at {}%", payload),
        EventType::AppInstalled => format!("installed {}", payload),
        EventType::AppRemoved => format!("removed {}", payload),
        EventType::LockStatusChanged => match event.locked() {
            Some(true) => "locked".into(),
            _ => "unlocked".into(),
        },
        EventType::UnlockRequested => {
            let who = event.device_name.as_deref().unwrap_or("device");
            let what = match (event.request_type, &event.app_name, &event.app_package_name) {
                (Some(UnlockScope::App), Some(name), _) => name.clone(),
                (Some(UnlockScope::App), None, Some(target)) => target.to_string(),
                _ => "the device".into(),
            };
            if payload.is_empty() {
                format!("{} asks to unlock {}", who, what)
            } else {
                format!("{} asks to unlock {}: \"{}\"", who, what, payload)
            }
        }
    }
}

pub fn push_update(update: &PushUpdate) -> String {
    match update {
        PushUpdate::Connected => "connected".into(),
        PushUpdate::Event(e) => event(e),
        PushUpdate::Disconnected { error, retry_in } => {
            format!("disconnected ({}), retrying in {}", error, format_duration(*retry_in))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardian_util::TargetId;

    fn record() -> DeviceRecord {
        let mut record = DeviceRecord::new("PG_Child_1", "192.168.1.20", 8080);
        record.user_assigned_name = Some("Tablet".into());
        record
    }

    #[test]
    fn offline_summary_shows_reason() {
        let summary = DeviceSummary {
            record: record(),
            online: false,
            locked: false,
            battery_level: None,
            rule_count: 0,
            screen_time_ms: 0,
            error: Some("operation timed out".into()),
        };

        let line = summary_line(&summary);
        assert!(line.starts_with("Tablet"));
        assert!(line.ends_with("offline (operation timed out)"));
    }

    #[test]
    fn online_summary_shows_state() {
        let summary = DeviceSummary {
            record: record(),
            online: true,
            locked: true,
            battery_level: Some(42),
            rule_count: 3,
            screen_time_ms: 65 * 60_000,
            error: None,
        };

        let line = summary_line(&summary);
        assert!(line.contains("locked"));
        assert!(line.contains("42%"));
        assert!(line.contains("1h 5m"));
    }

    #[test]
    fn unlock_request_names_target() {
        let event = Event::unlock_requested(
            "Tablet",
            Some((TargetId::new("com.example.game"), "Game".into())),
            Some("homework done".into()),
            1,
        );
        assert_eq!(super::event(&event), "Tablet asks to unlock Game: \"homework done\"");

        let event = Event::unlock_requested("Tablet", None, None, 1);
        assert_eq!(super::event(&event), "Tablet asks to unlock the device");
    }

    #[test]
    fn expired_timers_are_not_shown() {
        let stats: DeviceStats = serde_json::from_str(r#"{
            "lastSeenTimestamp": 0,
            "deviceName": "Tablet",
            "appTimers": {"com.example.old": 500, "com.example.new": 120000}
        }"#)
        .unwrap();

        let text = super::stats(&stats, 1_000);
        assert!(text.contains("com.example.new (1m 59s)"));
        assert!(!text.contains("com.example.old"));
    }
}
