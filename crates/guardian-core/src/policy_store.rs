//! Observable policy state with copy-on-write snapshots

use guardian_api::{Category, PolicySnapshot, RuleSet, WarningKey};
use guardian_store::Store;
use guardian_util::TargetId;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Single source of truth for agent policy.
///
/// Readers get an `Arc` to an immutable snapshot; every mutation clones the
/// snapshot if it is shared, edits the copy and publishes it in one step, so
/// no reader can observe half of a mutation.
pub struct PolicyStore {
    tx: watch::Sender<Arc<PolicySnapshot>>,
    store: Option<Arc<dyn Store>>,
}

impl PolicyStore {
    /// In-memory policy store
    pub fn new(initial: PolicySnapshot) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx, store: None }
    }

    /// Restore from `store` and persist every subsequent mutation to it
    pub fn with_persistence(store: Arc<dyn Store>) -> Self {
        let initial = match store.load_policy() {
            Ok(Some(snapshot)) => {
                info!(rules = snapshot.rules.len(), "Restored policy snapshot");
                snapshot
            }
            Ok(None) => PolicySnapshot::default(),
            Err(e) => {
                warn!(error = %e, "Failed to load policy snapshot, starting empty");
                PolicySnapshot::default()
            }
        };

        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self {
            tx,
            store: Some(store),
        }
    }

    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.tx.borrow().clone()
    }

    /// Receiver notified after every mutation
    pub fn subscribe(&self) -> watch::Receiver<Arc<PolicySnapshot>> {
        self.tx.subscribe()
    }

    /// Apply `f` atomically; it returns whether anything changed
    fn update(&self, f: impl FnOnce(&mut PolicySnapshot) -> bool) -> bool {
        let changed = self
            .tx
            .send_if_modified(|current| f(Arc::make_mut(current)));

        if changed {
            self.persist();
        }
        changed
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = self.snapshot();
        if let Err(e) = store.save_policy(&snapshot) {
            warn!(error = %e, "Failed to persist policy snapshot");
        }
    }

    /// Replace all rules and category limits.
    ///
    /// `temporary_unlock_until` is taken as-is. A `global_lock_until` in the
    /// future engages a timed lock; otherwise the current lock is kept.
    /// Returns `true` when the lock state changed.
    pub fn replace_rule_set(&self, set: RuleSet, now_ms: i64) -> bool {
        let mut lock_changed = false;

        self.update(|s| {
            s.rules = set.rules;
            s.category_limits = set.category_limits;
            s.temporary_unlock_until = set.temporary_unlock_until;

            if set.global_lock_until > now_ms {
                lock_changed = !s.global_lock.locked;
                s.global_lock.locked = true;
                s.global_lock.until_ms = set.global_lock_until;
            }
            true
        });

        debug!(lock_changed, "Rule set replaced");
        lock_changed
    }

    /// `until_ms == 0` locks until explicitly cleared. Unlocking clears any
    /// expiry. Returns `true` when the locked flag flipped.
    pub fn set_global_lock(&self, locked: bool, until_ms: i64) -> bool {
        let mut flipped = false;

        self.update(|s| {
            let until_ms = if locked { until_ms } else { 0 };
            if s.global_lock.locked == locked && s.global_lock.until_ms == until_ms {
                return false;
            }
            flipped = s.global_lock.locked != locked;
            s.global_lock.locked = locked;
            s.global_lock.until_ms = until_ms;
            true
        });

        flipped
    }

    /// Release a timed lock whose expiry has passed
    pub fn release_expired_lock(&self, now_ms: i64) -> bool {
        self.update(|s| {
            if !s.global_lock.has_lapsed(now_ms) {
                return false;
            }
            s.global_lock.locked = false;
            s.global_lock.until_ms = 0;
            true
        })
    }

    /// Set (`Some(expires_at)`) or clear (`None`) a per-target timer
    pub fn set_target_timer(&self, target: &TargetId, expires_at: Option<i64>) {
        self.update(|s| match expires_at {
            Some(at) => s.target_timers.insert(target.clone(), at) != Some(at),
            None => s.target_timers.remove(target).is_some(),
        });
    }

    /// Set (`Some(expires_at)`) or clear (`None`) a per-category timer
    pub fn set_category_timer(&self, category: Category, expires_at: Option<i64>) {
        self.update(|s| match expires_at {
            Some(at) => s.category_timers.insert(category, at) != Some(at),
            None => s.category_timers.remove(&category).is_some(),
        });
    }

    pub fn set_custom_category(&self, target: &TargetId, category: Category) {
        self.update(|s| s.custom_categories.insert(target.clone(), category) != Some(category));
    }

    /// Extend the device-wide unlock to at least `until_ms`; returns the
    /// resulting deadline
    pub fn extend_temporary_unlock(&self, until_ms: i64) -> i64 {
        let mut deadline = 0;

        self.update(|s| {
            deadline = s.temporary_unlock_until.max(until_ms);
            let changed = deadline != s.temporary_unlock_until;
            s.temporary_unlock_until = deadline;
            changed
        });

        deadline
    }

    /// Record a warning for `day`. Returns `false` if one was already
    /// recorded for that day, so concurrent callers warn exactly once.
    pub fn mark_warned(&self, key: &WarningKey, day: &str) -> bool {
        self.update(|s| {
            if s.has_warned(key, day) {
                return false;
            }
            s.warnings.insert(key.to_string(), day.to_string());
            true
        })
    }

    /// Forget a warning so it can fire again today
    pub fn clear_warning(&self, key: &WarningKey) {
        self.update(|s| s.warnings.remove(&key.to_string()).is_some());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardian_api::{CategoryLimit, Rule};
    use guardian_store::SqliteStore;

    fn populated() -> RuleSet {
        RuleSet {
            rules: vec![Rule::new("a").blocked(), Rule::new("b").with_quota_ms(1000)],
            category_limits: vec![CategoryLimit::new(Category::Games, 5000)],
            global_lock_until: 0,
            temporary_unlock_until: 0,
        }
    }

    #[test]
    fn replacement_is_total() {
        let store = PolicyStore::new(PolicySnapshot::default());
        store.replace_rule_set(populated(), 0);
        assert_eq!(store.snapshot().rules.len(), 2);

        store.replace_rule_set(RuleSet::default(), 0);
        let snapshot = store.snapshot();
        assert!(snapshot.rules.is_empty());
        assert!(snapshot.category_limits.is_empty());
    }

    #[test]
    fn rule_set_lock_deadline() {
        let store = PolicyStore::new(PolicySnapshot::default());

        // Past deadline leaves the lock alone
        assert!(!store.replace_rule_set(
            RuleSet {
                global_lock_until: 500,
                ..Default::default()
            },
            1000
        ));
        assert!(!store.snapshot().global_lock.locked);

        // Future deadline engages a timed lock
        assert!(store.replace_rule_set(
            RuleSet {
                global_lock_until: 5000,
                ..Default::default()
            },
            1000
        ));
        assert_eq!(store.snapshot().global_lock.until_ms, 5000);

        assert!(store.release_expired_lock(5000));
        assert!(!store.snapshot().global_lock.locked);
        assert!(!store.release_expired_lock(6000));
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let store = PolicyStore::new(PolicySnapshot::default());
        let before = store.snapshot();

        store.set_global_lock(true, 0);

        assert!(!before.global_lock.locked);
        assert!(store.snapshot().global_lock.locked);
    }

    #[test]
    fn lock_flip_reporting() {
        let store = PolicyStore::new(PolicySnapshot::default());
        assert!(store.set_global_lock(true, 0));
        assert!(!store.set_global_lock(true, 0));
        assert!(store.set_global_lock(false, 0));
    }

    #[test]
    fn timers_set_and_clear() {
        let store = PolicyStore::new(PolicySnapshot::default());
        let target = TargetId::new("x");

        store.set_target_timer(&target, Some(100));
        store.set_category_timer(Category::Games, Some(200));
        assert_eq!(store.snapshot().target_timers.get(&target), Some(&100));
        assert_eq!(store.snapshot().category_timers.get(&Category::Games), Some(&200));

        store.set_target_timer(&target, None);
        store.set_category_timer(Category::Games, None);
        assert!(store.snapshot().target_timers.is_empty());
        assert!(store.snapshot().category_timers.is_empty());
    }

    #[test]
    fn temporary_unlock_only_extends() {
        let store = PolicyStore::new(PolicySnapshot::default());
        assert_eq!(store.extend_temporary_unlock(1000), 1000);
        assert_eq!(store.extend_temporary_unlock(500), 1000);
        assert_eq!(store.extend_temporary_unlock(2000), 2000);
    }

    #[test]
    fn warning_marked_once_per_day() {
        let store = PolicyStore::new(PolicySnapshot::default());
        let key = WarningKey::Target(TargetId::new("x"));

        assert!(store.mark_warned(&key, "2025-01-01"));
        assert!(!store.mark_warned(&key, "2025-01-01"));
        assert!(store.mark_warned(&key, "2025-01-02"));

        store.clear_warning(&key);
        assert!(store.mark_warned(&key, "2025-01-02"));
    }

    #[test]
    fn subscribers_see_mutations() {
        let store = PolicyStore::new(PolicySnapshot::default());
        let mut rx = store.subscribe();

        store.set_global_lock(true, 0);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().global_lock.locked);
    }

    #[test]
    fn persisted_across_restart() {
        let backing: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());

        let store = PolicyStore::with_persistence(backing.clone());
        store.replace_rule_set(populated(), 0);
        store.set_custom_category(&TargetId::new("a"), Category::Social);
        drop(store);

        let restored = PolicyStore::with_persistence(backing);
        let snapshot = restored.snapshot();
        assert_eq!(snapshot.rules.len(), 2);
        assert_eq!(
            snapshot.custom_categories.get(&TargetId::new("a")),
            Some(&Category::Social)
        );
    }
}
