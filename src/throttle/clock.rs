//! Time sources used by rate accounting.
//!
//! [`SystemClock`] reads `Instant::now()` and really blocks. `ManualClock`
//! never blocks: a sleep advances its time instantly and is recorded, which
//! makes window arithmetic deterministic under test or simulation.
//!
//! `ManualClock` is available with the `test-helpers` feature or in test
//! builds:
//!
//! ```toml
//! [dev-dependencies]
//! bandwidth = { version = "*", features = ["test-helpers"] }
//! ```

use std::fmt::Debug;
#[cfg(any(test, feature = "test-helpers"))]
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(any(test, feature = "test-helpers"))]
use parking_lot::Mutex;

use super::cancel::CancelToken;

/// Result of a clock sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The full duration elapsed
    Completed,
    /// The cancellation token fired first
    Cancelled,
}

/// Source of time and blocking waits for a rate state.
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> Instant;

    /// Block the calling thread for `duration`, observing `cancel` if given.
    fn sleep(&self, duration: Duration, cancel: Option<&CancelToken>) -> SleepOutcome;
}

/// System clock implementation using `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration, cancel: Option<&CancelToken>) -> SleepOutcome {
        match cancel {
            Some(token) if token.wait_for(duration) => SleepOutcome::Cancelled,
            Some(_) => SleepOutcome::Completed,
            None => {
                std::thread::sleep(duration);
                SleepOutcome::Completed
            }
        }
    }
}

/// Manually driven clock.
///
/// Clones share the same time and sleep log, so a test can keep one handle
/// while a rate state owns another. Advances past the largest representable
/// instant leave the time unchanged.
#[cfg(any(test, feature = "test-helpers"))]
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualState>>,
}

#[cfg(any(test, feature = "test-helpers"))]
#[derive(Debug)]
struct ManualState {
    now: Instant,
    sleeps: Vec<Duration>,
}

#[cfg(any(test, feature = "test-helpers"))]
impl ManualState {
    fn advance(&mut self, duration: Duration) {
        if let Some(now) = self.now.checked_add(duration) {
            self.now = now;
        }
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl ManualClock {
    /// Create a manual clock starting at a specific instant.
    pub fn new(start: Instant) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualState {
                now: start,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Advance the clock by a duration without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.inner.lock().advance(duration);
    }

    /// Durations of every completed sleep, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.lock().sleeps.clone()
    }

    /// Sum of all completed sleeps.
    pub fn total_slept(&self) -> Duration {
        self.inner
            .lock()
            .sleeps
            .iter()
            .fold(Duration::ZERO, |total, d| total.saturating_add(*d))
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.lock().now
    }

    fn sleep(&self, duration: Duration, cancel: Option<&CancelToken>) -> SleepOutcome {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return SleepOutcome::Cancelled;
        }
        let mut state = self.inner.lock();
        state.advance(duration);
        state.sleeps.push(duration);
        SleepOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock() {
        let clock = SystemClock::new();
        let t1 = clock.now();
        let outcome = clock.sleep(Duration::from_millis(10), None);
        let t2 = clock.now();

        assert_eq!(outcome, SleepOutcome::Completed);
        assert!(t2 - t1 >= Duration::from_millis(10));
    }

    #[test]
    fn test_system_clock_cancelled_sleep() {
        let clock = SystemClock::new();
        let token = CancelToken::new();
        token.cancel();

        let start = Instant::now();
        let outcome = clock.sleep(Duration::from_secs(10), Some(&token));
        assert_eq!(outcome, SleepOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_manual_clock_sleep_advances() {
        let start = Instant::now();
        let clock = ManualClock::new(start);
        let shared = clock.clone();

        shared.sleep(Duration::from_secs(3), None);
        clock.advance(Duration::from_secs(1));

        assert_eq!(clock.now(), start + Duration::from_secs(4));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(3)]);
        assert_eq!(clock.total_slept(), Duration::from_secs(3));
    }

    #[test]
    fn test_manual_clock_cancelled_sleep_does_not_advance() {
        let start = Instant::now();
        let clock = ManualClock::new(start);
        let token = CancelToken::new();
        token.cancel();

        assert_eq!(
            clock.sleep(Duration::from_secs(1), Some(&token)),
            SleepOutcome::Cancelled
        );
        assert_eq!(clock.now(), start);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_manual_clock_unbounded_sleep() {
        let start = Instant::now();
        let clock = ManualClock::new(start);

        assert_eq!(clock.sleep(Duration::MAX, None), SleepOutcome::Completed);
        assert_eq!(clock.sleep(Duration::MAX, None), SleepOutcome::Completed);
        assert_eq!(clock.now(), start);
        assert_eq!(clock.total_slept(), Duration::MAX);
    }
}
