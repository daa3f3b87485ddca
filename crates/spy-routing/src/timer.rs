//! One-shot timers driven by an external clock
//!
//! The router keeps one pending deadline per timer kind. Scheduling a timer
//! that is already pending replaces its deadline, so a kind never fires
//! twice for one arm. Drivers ask for [`Timers::next_deadline`], sleep until
//! then, and collect what is due with [`Timers::take_due`].

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Periodic work done by a router
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    /// Broadcast our position
    Hello,
    /// Drain the deferred queue
    CheckQueue,
    /// Look for diverged disjoint paths
    CheckParity,
}

/// A set of one-shot timers, at most one pending per kind
#[derive(Debug, Clone)]
pub struct Timers<K: Ord + Copy> {
    deadlines: BTreeMap<K, Instant>,
}

impl<K: Ord + Copy> Default for Timers<K> {
    fn default() -> Self {
        Self {
            deadlines: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Copy> Timers<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` to fire `delay` after `now`, replacing any pending fire
    pub fn schedule(&mut self, kind: K, now: Instant, delay: Duration) {
        self.deadlines.insert(kind, now + delay);
    }

    pub fn cancel(&mut self, kind: K) {
        self.deadlines.remove(&kind);
    }

    pub fn cancel_all(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_running(&self, kind: K) -> bool {
        self.deadlines.contains_key(&kind)
    }

    pub fn deadline(&self, kind: K) -> Option<Instant> {
        self.deadlines.get(&kind).copied()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Disarm and return every timer due at `now`, earliest first
    pub fn take_due(&mut self, now: Instant) -> Vec<K> {
        let mut due: Vec<(Instant, K)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(kind, deadline)| (*deadline, *kind))
            .collect();
        due.sort();

        for (_, kind) in &due {
            self.deadlines.remove(kind);
        }
        due.into_iter().map(|(_, kind)| kind).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_replaces() {
        let now = Instant::now();
        let mut timers = Timers::new();
        timers.schedule(TimerKind::Hello, now, Duration::from_secs(5));
        timers.schedule(TimerKind::Hello, now, Duration::from_secs(1));

        assert_eq!(timers.next_deadline(), Some(now + Duration::from_secs(1)));
        assert_eq!(timers.take_due(now + Duration::from_secs(1)), vec![TimerKind::Hello]);
        assert!(!timers.is_running(TimerKind::Hello));
        assert!(timers.take_due(now + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn test_take_due_in_deadline_order() {
        let now = Instant::now();
        let mut timers = Timers::new();
        timers.schedule(TimerKind::Hello, now, Duration::from_millis(900));
        timers.schedule(TimerKind::CheckParity, now, Duration::from_millis(100));
        timers.schedule(TimerKind::CheckQueue, now, Duration::from_secs(3));

        let due = timers.take_due(now + Duration::from_secs(1));
        assert_eq!(due, vec![TimerKind::CheckParity, TimerKind::Hello]);
        assert!(timers.is_running(TimerKind::CheckQueue));
    }

    #[test]
    fn test_cancel() {
        let now = Instant::now();
        let mut timers = Timers::new();
        timers.schedule(TimerKind::CheckQueue, now, Duration::from_millis(500));
        timers.cancel(TimerKind::CheckQueue);
        assert_eq!(timers.next_deadline(), None);

        timers.schedule(TimerKind::Hello, now, Duration::ZERO);
        timers.cancel_all();
        assert!(!timers.is_running(TimerKind::Hello));
    }
}
