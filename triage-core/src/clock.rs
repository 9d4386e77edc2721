//! Time sources for the ledger.
//!
//! Aggregation windows compare `updated_at` against "now". Production code
//! uses [`SystemClock`]; tests substitute [`ManualClock`], where time only
//! moves when advanced explicitly.

use crate::Timestamp;
use chrono::{Duration, Utc};
use std::sync::RwLock;

// ─── Clock Trait ────────────────────────────────────────────────────────────

/// Abstraction over wall-clock time.
pub trait Clock: Send + Sync {
    /// Current UTC timestamp.
    fn now(&self) -> Timestamp;
}

// ─── System Clock ───────────────────────────────────────────────────────────

/// Production clock backed by `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

// ─── Manual Clock ───────────────────────────────────────────────────────────

/// Virtual clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    current: RwLock<Timestamp>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: RwLock::new(start),
        }
    }

    /// Create a clock frozen at the real current time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move time forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current += by;
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.advance(Duration::minutes(minutes));
    }

    /// Jump to an absolute time.
    pub fn set(&self, to: Timestamp) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_only_moves_when_advanced() {
        let clock = ManualClock::starting_now();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);

        clock.advance_minutes(5);
        assert_eq!(clock.now() - t0, Duration::minutes(5));
    }

    #[test]
    fn test_manual_clock_set() {
        let clock = ManualClock::starting_now();
        let target = clock.now() - Duration::days(1);
        clock.set(target);
        assert_eq!(clock.now(), target);
    }

    #[test]
    fn test_system_clock_is_monotone_enough() {
        let a = SystemClock.now();
        let b = SystemClock.now();
        assert!(b >= a);
    }
}
