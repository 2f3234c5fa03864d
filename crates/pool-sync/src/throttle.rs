use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Run the invocation immediately.
    RunNow,
    /// Too soon after the last run; one invocation is scheduled for this instant.
    Deferred(Instant),
    /// An invocation is already scheduled; this request is absorbed by it.
    Coalesced,
}

/// Keyed throttle: at most one run per key per `min_interval`, and at most
/// one pending invocation per key. The caller owns the clock and the timer;
/// this type only keeps the book.
#[derive(Debug)]
pub struct Throttle<K> {
    min_interval: Duration,
    last_run: HashMap<K, Instant>,
    pending: HashMap<K, Instant>,
}

impl<K: Eq + Hash + Clone> Throttle<K> {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_run: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn request(&mut self, key: K, now: Instant) -> ThrottleDecision {
        if self.pending.contains_key(&key) {
            return ThrottleDecision::Coalesced;
        }
        match self.last_run.get(&key) {
            Some(last) if now < *last + self.min_interval => {
                let at = *last + self.min_interval;
                self.pending.insert(key, at);
                ThrottleDecision::Deferred(at)
            }
            _ => {
                self.last_run.insert(key, now);
                ThrottleDecision::RunNow
            }
        }
    }

    /// Earliest scheduled invocation, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Removes and returns every key whose scheduled instant has passed,
    /// recording them as run at `now`.
    pub fn take_due(&mut self, now: Instant) -> Vec<K> {
        let due: Vec<K> = self
            .pending
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &due {
            self.pending.remove(key);
            self.last_run.insert(key.clone(), now);
        }
        due
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    /// Drops any bookkeeping for `key` (used when its subscription is torn down).
    pub fn forget(&mut self, key: &K) {
        self.pending.remove(key);
        self.last_run.remove(key);
    }
}
