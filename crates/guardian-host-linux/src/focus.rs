//! Focus journal: usage events synthesized from observed focus changes

use guardian_host_api::{UsageEvent, UsageEventKind, UsageStat};
use guardian_util::TargetId;
use std::collections::BTreeMap;

/// Records foreground/background transitions as focus moves between
/// targets, and answers the same queries the OS usage source would.
#[derive(Debug, Default)]
pub struct FocusJournal {
    events: Vec<UsageEvent>,
    current: Option<TargetId>,
}

impl FocusJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&TargetId> {
        self.current.as_ref()
    }

    /// Record that `focused` is in front at `now_ms`. Returns `true` when
    /// focus moved.
    pub fn observe(&mut self, focused: Option<&TargetId>, now_ms: i64) -> bool {
        if self.current.as_ref() == focused {
            return false;
        }

        if let Some(previous) = self.current.take() {
            self.events.push(UsageEvent::background(previous, now_ms));
        }
        if let Some(target) = focused {
            self.events
                .push(UsageEvent::foreground(target.clone(), now_ms));
            self.current = Some(target.clone());
        }
        true
    }

    /// Transitions with `start_ms <= timestamp <= end_ms`
    pub fn events_between(&self, start_ms: i64, end_ms: i64) -> Vec<UsageEvent> {
        self.events
            .iter()
            .filter(|e| e.timestamp_ms >= start_ms && e.timestamp_ms <= end_ms)
            .cloned()
            .collect()
    }

    /// Foreground time per target inside `[start_ms, end_ms]`. The interval
    /// of the target still in front is closed at `end_ms`.
    pub fn stats_between(&self, start_ms: i64, end_ms: i64) -> Vec<UsageStat> {
        let mut intervals: Vec<(&TargetId, i64, i64)> = Vec::new();
        let mut opened: Option<(&TargetId, i64)> = None;

        for event in self.events.iter().filter(|e| e.timestamp_ms <= end_ms) {
            match event.kind {
                UsageEventKind::MoveToForeground => {
                    opened = Some((&event.target, event.timestamp_ms));
                }
                UsageEventKind::MoveToBackground => {
                    if let Some((target, from)) = opened.take()
                        && target == &event.target
                    {
                        intervals.push((target, from, event.timestamp_ms));
                    }
                }
            }
        }
        if let Some((target, from)) = opened {
            intervals.push((target, from, end_ms));
        }

        let mut totals: BTreeMap<&TargetId, (i64, i64)> = BTreeMap::new();
        for (target, from, to) in intervals {
            let from = from.max(start_ms);
            let to = to.min(end_ms);
            if to > from {
                let entry = totals.entry(target).or_insert((0, 0));
                entry.0 += to - from;
                entry.1 = entry.1.max(to);
            }
        }

        totals
            .into_iter()
            .map(|(target, (foreground_ms, last_used_ms))| UsageStat {
                target: target.clone(),
                foreground_ms,
                last_used_ms,
            })
            .collect()
    }

    /// Forget transitions older than `cutoff_ms`
    pub fn prune_before(&mut self, cutoff_ms: i64) {
        self.events.retain(|e| e.timestamp_ms >= cutoff_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(id: &str) -> TargetId {
        TargetId::new(id)
    }

    #[test]
    fn observe_records_transitions() {
        let mut journal = FocusJournal::new();

        assert!(journal.observe(Some(&t("a")), 1_000));
        assert!(!journal.observe(Some(&t("a")), 2_000));
        assert!(journal.observe(Some(&t("b")), 3_000));
        assert!(journal.observe(None, 4_000));

        let events = journal.events_between(0, 10_000);
        assert_eq!(
            events,
            vec![
                UsageEvent::foreground("a", 1_000),
                UsageEvent::background("a", 3_000),
                UsageEvent::foreground("b", 3_000),
                UsageEvent::background("b", 4_000),
            ]
        );
        assert_eq!(journal.current(), None);
    }

    #[test]
    fn stats_clip_to_range_and_close_open_interval() {
        let mut journal = FocusJournal::new();
        journal.observe(Some(&t("a")), 1_000);
        journal.observe(Some(&t("b")), 5_000);

        let stats = journal.stats_between(2_000, 9_000);
        let a = stats.iter().find(|s| s.target == t("a")).unwrap();
        let b = stats.iter().find(|s| s.target == t("b")).unwrap();

        assert_eq!(a.foreground_ms, 3_000);
        assert_eq!(a.last_used_ms, 5_000);
        assert_eq!(b.foreground_ms, 4_000);
        assert_eq!(b.last_used_ms, 9_000);
    }

    #[test]
    fn prune_drops_old_events() {
        let mut journal = FocusJournal::new();
        journal.observe(Some(&t("a")), 1_000);
        journal.observe(Some(&t("b")), 5_000);

        journal.prune_before(4_000);
        assert_eq!(journal.events_between(0, 10_000).len(), 2);
    }
}
