//! Millisecond clocks for `updatedAt` and `syncedAt` stamps.

use crate::model::Timestamp;
use chrono::Utc;
use parking_lot::Mutex;

/// A source of wall-clock milliseconds.
pub trait Clock: Send + Sync {
    /// Returns the current time in milliseconds since the Unix epoch.
    fn now(&self) -> Timestamp;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now().timestamp_millis()
    }
}

/// A clock that never repeats or goes backwards.
///
/// Each reading is `max(source, previous + 1)`, so two mutations made in the
/// same millisecond still order correctly under last-write-wins.
#[derive(Debug)]
pub struct MonotonicClock<C = SystemClock> {
    source: C,
    last: Mutex<Timestamp>,
}

impl MonotonicClock<SystemClock> {
    /// Creates a monotonic clock over the system clock.
    pub fn new() -> Self {
        Self::with_source(SystemClock)
    }
}

impl Default for MonotonicClock<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MonotonicClock<C> {
    /// Creates a monotonic clock over `source`.
    pub fn with_source(source: C) -> Self {
        Self {
            source,
            last: Mutex::new(Timestamp::MIN),
        }
    }

    /// Makes every later reading exceed `seen`.
    ///
    /// Used after applying remote records so local edits never lose to a
    /// record the device already holds.
    pub fn observe(&self, seen: Timestamp) {
        let mut last = self.last.lock();
        if seen > *last {
            *last = seen;
        }
    }
}

impl<C: Clock> Clock for MonotonicClock<C> {
    fn now(&self) -> Timestamp {
        let mut last = self.last.lock();
        let now = self.source.now().max(last.saturating_add(1));
        *last = now;
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Frozen(Timestamp);

    impl Clock for Frozen {
        fn now(&self) -> Timestamp {
            self.0
        }
    }

    #[test]
    fn system_clock_is_recent() {
        // 2020-01-01 in millis
        assert!(SystemClock.now() > 1_577_836_800_000);
    }

    #[test]
    fn monotonic_never_repeats() {
        let clock = MonotonicClock::with_source(Frozen(1_000));
        assert_eq!(clock.now(), 1_000);
        assert_eq!(clock.now(), 1_001);
        assert_eq!(clock.now(), 1_002);
    }

    #[test]
    fn observe_pushes_clock_forward() {
        let clock = MonotonicClock::with_source(Frozen(1_000));
        clock.observe(5_000);
        assert_eq!(clock.now(), 5_001);
        clock.observe(10);
        assert_eq!(clock.now(), 5_002);
    }
}
