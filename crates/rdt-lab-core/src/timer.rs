//! Deadline-based retransmission timers.
//!
//! A timer never runs a task of its own. Handlers sleep until the earliest
//! deadline they hold and then ask which timers have expired. Timers fire
//! once; an expired timer is dropped and a fresh one is started in its
//! place.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    tag: u16,
    deadline: Instant,
}

impl Timer {
    pub fn start(tag: u16, timeout: Duration) -> Self {
        Self {
            tag,
            deadline: Instant::now() + timeout,
        }
    }

    pub fn tag(&self) -> u16 {
        self.tag
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// One timer per tag, as used for per-packet retransmission.
#[derive(Debug, Default)]
pub struct TimerSet {
    timers: HashMap<u16, Timer>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a timer for `tag`, replacing any existing one.
    pub fn start(&mut self, tag: u16, timeout: Duration) {
        self.timers.insert(tag, Timer::start(tag, timeout));
    }

    /// Drop every timer whose tag fails `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(u16) -> bool) {
        self.timers.retain(|&tag, _| keep(tag));
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(Timer::deadline).min()
    }

    /// Remove and return the tags of every timer expired at `now`, lowest first.
    pub fn take_expired(&mut self, now: Instant) -> Vec<u16> {
        let mut expired: Vec<u16> = self
            .timers
            .values()
            .filter(|timer| timer.is_expired(now))
            .map(Timer::tag)
            .collect();
        expired.sort_unstable();
        for tag in &expired {
            self.timers.remove(tag);
        }
        expired
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn timer_expires_at_deadline() {
        let timer = Timer::start(4, Duration::from_millis(500));
        assert!(!timer.is_expired(Instant::now()));

        tokio::time::advance(Duration::from_millis(499)).await;
        assert!(!timer.is_expired(Instant::now()));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(timer.is_expired(Instant::now()));
        assert_eq!(timer.tag(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_timers_fire_once() {
        let mut timers = TimerSet::new();
        timers.start(1, Duration::from_millis(100));
        timers.start(2, Duration::from_millis(300));
        timers.start(0, Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(timers.take_expired(Instant::now()), vec![0, 1]);
        assert!(timers.take_expired(Instant::now()).is_empty());
        assert!(!timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_and_retain_removes() {
        let mut timers = TimerSet::new();
        timers.start(1, Duration::from_millis(100));
        let first = timers.next_deadline();

        tokio::time::advance(Duration::from_millis(50)).await;
        timers.start(1, Duration::from_millis(100));
        assert!(timers.next_deadline() > first);

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(timers.take_expired(Instant::now()).is_empty());

        timers.retain(|tag| tag != 1);
        assert!(timers.is_empty());
        assert_eq!(timers.next_deadline(), None);
    }
}
