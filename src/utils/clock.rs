// src/utils/clock.rs
//! Monotonic time source
//!
//! Every duration-based predicate in the engine compares a stored
//! `Instant` against `Clock::now()`. Production code uses
//! [`MonotonicClock`]; tests drive a [`ManualClock`] so boundaries can be
//! hit exactly.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic time
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-independent clock backed by `Instant::now()`
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock();
        *current += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }
}

/// True once `duration` has elapsed since `start`, inclusive of the boundary
pub fn has_passed(start: Instant, duration: Duration, now: Instant) -> bool {
    now.saturating_duration_since(start) >= duration
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now() - start, Duration::from_millis(1500));
    }

    #[test]
    fn test_has_passed_boundary() {
        let clock = ManualClock::new();
        let start = clock.now();
        let duration = Duration::from_secs(2);

        clock.advance(Duration::from_millis(1999));
        assert!(!has_passed(start, duration, clock.now()));

        clock.advance(Duration::from_millis(1));
        assert!(has_passed(start, duration, clock.now()));
    }

    #[test]
    fn test_has_passed_with_earlier_now() {
        let clock = ManualClock::new();
        let earlier = clock.now();
        clock.advance(Duration::from_secs(1));
        let later = clock.now();
        assert!(!has_passed(later, Duration::from_millis(1), earlier));
        assert!(has_passed(later, Duration::ZERO, earlier));
    }

    #[test]
    fn test_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), other.now());
    }
}
