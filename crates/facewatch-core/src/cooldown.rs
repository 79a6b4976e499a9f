//! Keyed time-window throttles.
//!
//! An action for a key is allowed only when strictly more than `window` has
//! elapsed since the last allowed action for that key. Entries are kept for
//! the process lifetime unless [`Cooldown::sweep`] is called.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Cooldown<K> {
    window: Duration,
    last: HashMap<K, Instant>,
}

impl<K: Eq + Hash> Cooldown<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether an action for `key` would be allowed at `now`, without recording it.
    pub fn is_ready(&self, key: &K, now: Instant) -> bool {
        match self.last.get(key) {
            Some(&last) => now.saturating_duration_since(last) > self.window,
            None => true,
        }
    }

    /// Record an allowed action for `key` at `now`.
    pub fn mark(&mut self, key: K, now: Instant) {
        self.last.insert(key, now);
    }

    /// Check and, when allowed, record in one step.
    pub fn try_acquire(&mut self, key: K, now: Instant) -> bool {
        if self.is_ready(&key, now) {
            self.mark(key, now);
            true
        } else {
            false
        }
    }

    /// Drop entries whose last action is older than `max_age`. Returns how
    /// many were removed.
    pub fn sweep(&mut self, now: Instant, max_age: Duration) -> usize {
        let before = self.last.len();
        self.last
            .retain(|_, last| now.saturating_duration_since(*last) <= max_age);
        before - self.last.len()
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_allow_suppress_allow() {
        let t0 = Instant::now();
        let mut cd = Cooldown::new(secs(10));
        assert!(cd.try_acquire("alice", t0));
        assert!(!cd.try_acquire("alice", t0 + secs(5)));
        assert!(cd.try_acquire("alice", t0 + secs(11)));
        // Refreshed at t=11
        assert!(!cd.try_acquire("alice", t0 + secs(20)));
        assert!(cd.try_acquire("alice", t0 + secs(22)));
    }

    #[test]
    fn test_exact_window_is_suppressed() {
        let t0 = Instant::now();
        let mut cd = Cooldown::new(secs(10));
        assert!(cd.try_acquire(1u32, t0));
        assert!(!cd.try_acquire(1u32, t0 + secs(10)));
    }

    #[test]
    fn test_keys_are_independent() {
        let t0 = Instant::now();
        let mut cd = Cooldown::new(secs(10));
        assert!(cd.try_acquire("alice", t0));
        assert!(cd.try_acquire("bob", t0 + secs(1)));
        assert_eq!(cd.len(), 2);
    }

    #[test]
    fn test_suppressed_attempt_does_not_refresh() {
        let t0 = Instant::now();
        let mut cd = Cooldown::new(secs(10));
        assert!(cd.try_acquire("k", t0));
        assert!(!cd.try_acquire("k", t0 + secs(9)));
        assert!(cd.try_acquire("k", t0 + secs(11)));
    }

    #[test]
    fn test_is_ready_does_not_record() {
        let t0 = Instant::now();
        let mut cd = Cooldown::new(secs(10));
        assert!(cd.is_ready(&"k", t0));
        assert!(cd.is_empty());
        cd.mark("k", t0);
        assert!(!cd.is_ready(&"k", t0 + secs(3)));
    }

    #[test]
    fn test_sweep_removes_stale_entries() {
        let t0 = Instant::now();
        let mut cd = Cooldown::new(secs(10));
        cd.mark("old", t0);
        cd.mark("fresh", t0 + secs(35));
        assert_eq!(cd.sweep(t0 + secs(40), secs(30)), 1);
        assert_eq!(cd.len(), 1);
        assert!(!cd.is_ready(&"fresh", t0 + secs(40)));
        assert!(cd.is_ready(&"old", t0 + secs(40)));
    }
}
