//! Time utilities for guardian
//!
//! Policy deadlines travel on the wire as epoch milliseconds; schedules and
//! daily accounting are evaluated in the agent's local time.
//!
//! # Mock Time for Development
//!
//! In debug builds, `GUARDIAN_MOCK_TIME` overrides the system clock for every
//! time-sensitive operation. The mocked clock keeps advancing at real speed.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 22:30:00`)

use chrono::{DateTime, Datelike, Local, NaiveDateTime, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "GUARDIAN_MOCK_TIME";

/// Format of calendar-day keys used for daily accounting and warnings
pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

fn mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            let raw = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
            let parsed = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .and_then(|naive| Local.from_local_datetime(&naive).single());

            match parsed {
                Some(mock_dt) => {
                    let offset = mock_dt.signed_duration_since(Local::now());
                    tracing::info!(
                        mock_time = %raw,
                        offset_secs = offset.num_seconds(),
                        "Mock time enabled"
                    );
                    Some(offset)
                }
                None => {
                    tracing::warn!(
                        mock_time = %raw,
                        expected_format = "%Y-%m-%d %H:%M:%S",
                        "Invalid mock time, using system clock"
                    );
                    None
                }
            }
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    mock_time_offset().is_some()
}

/// Current local time, respecting mock time in debug builds.
pub fn now() -> DateTime<Local> {
    let real_now = Local::now();
    match mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    now().timestamp_millis()
}

/// Convert epoch milliseconds into local time. Out-of-range values yield `None`.
pub fn from_millis(ms: i64) -> Option<DateTime<Local>> {
    Local.timestamp_millis_opt(ms).single()
}

/// Calendar-day key (`yyyy-MM-dd`) in local time.
pub fn day_key(dt: &DateTime<Local>) -> String {
    dt.format(DAY_KEY_FORMAT).to_string()
}

/// Local midnight at the start of `dt`'s day.
pub fn start_of_day(dt: &DateTime<Local>) -> DateTime<Local> {
    let midnight = dt.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default();
    // DST gaps at midnight fall back to the earliest valid instant
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .unwrap_or(*dt)
}

/// ISO day number, 1 = Monday .. 7 = Sunday
pub fn iso_day(weekday: Weekday) -> u8 {
    weekday.number_from_monday() as u8
}

/// Wall-clock time of day at minute precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallClock {
    pub hour: u8,
    pub minute: u8,
}

impl WallClock {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    pub fn of(dt: &DateTime<Local>) -> Self {
        Self {
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
        }
    }

    pub fn minutes_from_midnight(&self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }
}

impl PartialOrd for WallClock {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WallClock {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.minutes_from_midnight()
            .cmp(&other.minutes_from_midnight())
    }
}

/// Set of ISO weekdays (1 = Monday .. 7 = Sunday) stored as a bit mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DaysOfWeek(u8);

impl DaysOfWeek {
    pub const ALL_DAYS: DaysOfWeek = DaysOfWeek(0x7F);
    pub const WEEKDAYS: DaysOfWeek = DaysOfWeek(0x1F);
    pub const WEEKENDS: DaysOfWeek = DaysOfWeek(0x60);
    pub const NONE: DaysOfWeek = DaysOfWeek(0);

    /// Build from ISO day numbers; values outside 1..=7 are ignored.
    pub fn from_iso_days(days: impl IntoIterator<Item = u8>) -> Self {
        let mask = days
            .into_iter()
            .filter(|d| (1..=7).contains(d))
            .fold(0u8, |mask, d| mask | (1 << (d - 1)));
        Self(mask)
    }

    pub fn iso_days(&self) -> Vec<u8> {
        (1..=7u8).filter(|d| self.0 & (1 << (d - 1)) != 0).collect()
    }

    pub fn contains(&self, weekday: Weekday) -> bool {
        self.0 & (1 << (iso_day(weekday) - 1)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// A recurring daily window. `end < start` denotes an overnight window.
///
/// Both bounds are inclusive at minute precision, and the day-of-week check
/// applies to the local day the instant falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub days: DaysOfWeek,
    pub start: WallClock,
    pub end: WallClock,
}

impl TimeWindow {
    pub fn new(days: DaysOfWeek, start: WallClock, end: WallClock) -> Self {
        Self { days, start, end }
    }

    pub fn contains(&self, dt: &DateTime<Local>) -> bool {
        if !self.days.contains(dt.weekday()) {
            return false;
        }

        let time = WallClock::of(dt);
        if self.start <= self.end {
            time >= self.start && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

/// Human-readable duration, e.g. `1h 5m`, `9m 30s`
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn days_round_trip_iso_numbers() {
        let days = DaysOfWeek::from_iso_days([1, 3, 7, 9]);
        assert_eq!(days.iso_days(), vec![1, 3, 7]);
        assert!(days.contains(Weekday::Mon));
        assert!(days.contains(Weekday::Sun));
        assert!(!days.contains(Weekday::Tue));
    }

    #[test]
    fn daytime_window() {
        let window = TimeWindow::new(
            DaysOfWeek::WEEKDAYS,
            WallClock::new(14, 0).unwrap(),
            WallClock::new(18, 0).unwrap(),
        );

        // 2025-12-29 is a Monday
        assert!(window.contains(&at(2025, 12, 29, 15, 0)));
        assert!(window.contains(&at(2025, 12, 29, 18, 0)));
        assert!(!window.contains(&at(2025, 12, 29, 10, 0)));
        // Saturday
        assert!(!window.contains(&at(2025, 12, 27, 15, 0)));
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let window = TimeWindow::new(
            DaysOfWeek::ALL_DAYS,
            WallClock::new(22, 0).unwrap(),
            WallClock::new(6, 0).unwrap(),
        );

        assert!(window.contains(&at(2025, 12, 29, 23, 30)));
        assert!(window.contains(&at(2025, 12, 30, 2, 0)));
        assert!(!window.contains(&at(2025, 12, 29, 12, 0)));
    }

    #[test]
    fn millis_conversion() {
        let dt = at(2025, 6, 1, 8, 15);
        let ms = dt.timestamp_millis();
        assert_eq!(from_millis(ms), Some(dt));
    }

    #[test]
    fn day_key_and_midnight() {
        let dt = at(2025, 3, 9, 17, 45);
        assert_eq!(day_key(&dt), "2025-03-09");

        let midnight = start_of_day(&dt);
        assert_eq!(midnight.hour(), 0);
        assert_eq!(day_key(&midnight), "2025-03-09");
    }

    #[test]
    fn format_durations() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(570)), "9m 30s");
        assert_eq!(format_duration(Duration::from_secs(3900)), "1h 5m");
    }
}
