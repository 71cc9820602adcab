//! Rate accounting state shared between throttled streams.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use super::clock::{Clock, SystemClock};

/// Mutable accounting for one throttling domain.
///
/// Only reachable through the guard returned by [`RateState::lock`].
#[derive(Debug)]
pub struct Accounting {
    /// Bytes attributed to the current window, including carried-over debt
    pub(crate) bytes_used: i64,
    /// When the current window's clock reference was last reset
    pub(crate) window_start: Instant,
    /// Time spent checking and transferring since the last rollover
    pub(crate) active: Duration,
    pub(crate) stats: RateStats,
}

impl Accounting {
    /// Get the bytes attributed to the current window.
    pub fn bytes_used(&self) -> i64 {
        self.bytes_used
    }

    /// Get the start of the current window.
    pub fn window_start(&self) -> Instant {
        self.window_start
    }

    /// Get the cumulative statistics.
    pub fn stats(&self) -> RateStats {
        self.stats
    }
}

/// Cumulative counters for a rate state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateStats {
    /// Total bytes moved through this state
    pub bytes_total: u64,
    /// Number of completed waits for quota
    pub sleeps: u64,
    /// Total time spent in completed waits
    pub slept: Duration,
}

/// Lock-protected accounting plus the clock it is measured against.
///
/// A rate state is either private to one stream or shared by reference
/// between several; every transfer holds the lock for its whole duration.
#[derive(Debug)]
pub struct RateState {
    accounting: Mutex<Accounting>,
    clock: Arc<dyn Clock>,
}

impl RateState {
    /// Create a new rate state on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a new rate state on a specific clock.
    ///
    /// The first window starts now, according to that clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let window_start = clock.now();
        Self {
            accounting: Mutex::new(Accounting {
                bytes_used: 0,
                window_start,
                active: Duration::ZERO,
                stats: RateStats::default(),
            }),
            clock,
        }
    }

    /// Create a new shareable rate state on the system clock.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Acquire the accounting lock.
    ///
    /// The guard releases the lock when dropped, on every exit path.
    pub fn lock(&self) -> MutexGuard<'_, Accounting> {
        self.accounting.lock()
    }

    /// Get the clock this state is measured against.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Get the bytes attributed to the current window.
    ///
    /// Blocks while a transfer holds the lock.
    pub fn bytes_used(&self) -> i64 {
        self.lock().bytes_used
    }

    /// Get a snapshot of the cumulative statistics.
    ///
    /// Blocks while a transfer holds the lock.
    pub fn stats(&self) -> RateStats {
        self.lock().stats
    }
}

impl Default for RateState {
    fn default() -> Self {
        Self::new()
    }
}
