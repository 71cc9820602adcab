//! Throttled transfer state machine.
//!
//! One call moves a whole buffer across as many quota windows as needed:
//!
//! - `Check`: stop once the buffer is consumed, otherwise sleep if the window
//!   is spent or transfer if quota remains.
//! - `Exec`: hand the underlying capability at most the remaining quota.
//! - `Sleep`: wait out the window, restart it and subtract one limit from the
//!   usage. Usage beyond the limit stays as debt for the next window.
//! - `End`: report the bytes moved and the failure, if any.
//!
//! The caller holds the rate state's lock for the whole run.

use std::ops::Range;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::cancel::CancelToken;
use super::capability::Chunk;
use super::clock::{Clock, SleepOutcome};
use super::quota::Quota;
use super::shared::QuotaSource;
use super::state::Accounting;
use crate::error::{Result, ThrottleError};

/// States of the transfer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Check,
    Exec,
    Sleep,
    End,
}

/// A single throttled transfer over a buffer of `len` bytes.
///
/// `op` receives the byte range of the buffer to move next and reports what
/// the underlying capability did with it.
pub(crate) struct Transfer<'a, F> {
    len: usize,
    index: usize,
    total: usize,
    quota: Quota,
    source: &'a QuotaSource,
    acct: &'a mut Accounting,
    clock: &'a dyn Clock,
    cancel: Option<&'a CancelToken>,
    op: F,
    failure: Option<ThrottleError>,
}

impl<'a, F> Transfer<'a, F>
where
    F: FnMut(Range<usize>) -> Chunk,
{
    pub(crate) fn new(
        len: usize,
        source: &'a QuotaSource,
        acct: &'a mut Accounting,
        clock: &'a dyn Clock,
        cancel: Option<&'a CancelToken>,
        op: F,
    ) -> Self {
        Self {
            len,
            index: 0,
            total: 0,
            quota: source.current(),
            source,
            acct,
            clock,
            cancel,
            op,
            failure: None,
        }
    }

    /// Run the state machine to completion.
    pub(crate) fn run(mut self) -> Result<usize> {
        let mut step = Step::Check;
        loop {
            step = match step {
                Step::Check => self.check(),
                Step::Exec => self.exec(),
                Step::Sleep => self.sleep(),
                Step::End => break,
            };
        }

        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(self.total),
        }
    }

    fn check(&mut self) -> Step {
        if self.index >= self.len {
            return Step::End;
        }

        let started = self.clock.now();
        self.quota = self.source.current();
        let next = if self.acct.bytes_used >= self.quota.signed_limit() {
            Step::Sleep
        } else {
            Step::Exec
        };
        self.record_active(started);
        next
    }

    fn exec(&mut self) -> Step {
        let started = self.clock.now();

        // Positive: check only lets us in below the limit.
        let remaining = (self.quota.signed_limit() - self.acct.bytes_used) as u64;
        let size = remaining.min((self.len - self.index) as u64) as usize;

        let chunk = (self.op)(self.index..self.index + size);
        let moved = chunk.moved.min(size);

        self.index += moved;
        self.total += moved;
        self.acct.bytes_used += moved as i64;
        self.acct.stats.bytes_total += moved as u64;
        self.record_active(started);

        trace!(
            requested = size,
            moved,
            total = self.total,
            bytes_used = self.acct.bytes_used,
            "Transferred chunk"
        );

        if let Some(source) = chunk.error {
            self.failure = Some(ThrottleError::TransferFailure {
                transferred: self.total,
                source,
            });
            return Step::End;
        }

        if moved == 0 {
            trace!(total = self.total, "Capability made no progress, ending transfer");
            return Step::End;
        }

        Step::Check
    }

    fn sleep(&mut self) -> Step {
        if self.cancel.is_some_and(CancelToken::is_cancelled) {
            return self.cancelled();
        }

        let elapsed = self
            .clock
            .now()
            .saturating_duration_since(self.acct.window_start);
        let wait = self.quota.window().saturating_sub(elapsed);

        debug!(
            wait = ?wait,
            active = ?self.acct.active,
            bytes_used = self.acct.bytes_used,
            limit = self.quota.limit(),
            "Quota exhausted, waiting for next window"
        );

        if !wait.is_zero() && self.clock.sleep(wait, self.cancel) == SleepOutcome::Cancelled {
            return self.cancelled();
        }

        self.acct.window_start = self.clock.now();
        self.acct.bytes_used -= self.quota.signed_limit();
        self.acct.active = Duration::ZERO;
        self.acct.stats.sleeps += 1;
        self.acct.stats.slept = self.acct.stats.slept.saturating_add(wait);

        Step::Check
    }

    fn cancelled(&mut self) -> Step {
        debug!(total = self.total, "Transfer cancelled while waiting for quota");
        self.failure = Some(ThrottleError::Cancelled {
            transferred: self.total,
        });
        Step::End
    }

    fn record_active(&mut self, started: Instant) {
        let spent = self.clock.now().saturating_duration_since(started);
        self.acct.active = self.acct.active.saturating_add(spent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::clock::ManualClock;
    use crate::throttle::state::RateState;
    use std::io;
    use std::sync::Arc;

    fn manual_state() -> (ManualClock, RateState) {
        let clock = ManualClock::new(Instant::now());
        let state = RateState::with_clock(Arc::new(clock.clone()));
        (clock, state)
    }

    fn fixed(limit: u64, window_ms: u64) -> QuotaSource {
        QuotaSource::Fixed(Quota::new(limit, Duration::from_millis(window_ms)).unwrap())
    }

    #[test]
    fn test_check_ends_on_empty_buffer() {
        let (_clock, state) = manual_state();
        let source = fixed(10, 1000);
        let mut acct = state.lock();
        acct.bytes_used = 50;

        let mut transfer = Transfer::new(0, &source, &mut acct, state.clock(), None, |_| {
            panic!("no transfer expected")
        });
        assert_eq!(transfer.check(), Step::End);
    }

    #[test]
    fn test_check_routes_on_usage() {
        let (_clock, state) = manual_state();
        let source = fixed(10, 1000);
        let mut acct = state.lock();

        acct.bytes_used = 9;
        let mut transfer = Transfer::new(4, &source, &mut acct, state.clock(), None, full_chunk);
        assert_eq!(transfer.check(), Step::Exec);
        drop(transfer);

        acct.bytes_used = 10;
        let mut transfer = Transfer::new(4, &source, &mut acct, state.clock(), None, full_chunk);
        assert_eq!(transfer.check(), Step::Sleep);
    }

    #[test]
    fn test_exec_clamps_to_remaining_quota() {
        let (_clock, state) = manual_state();
        let source = fixed(10, 1000);
        let mut acct = state.lock();
        acct.bytes_used = 6;

        let mut requested = Vec::new();
        let mut transfer = Transfer::new(100, &source, &mut acct, state.clock(), None, |r| {
            requested.push(r.clone());
            Chunk::ok(r.len())
        });
        transfer.check();
        assert_eq!(transfer.exec(), Step::Check);
        assert_eq!(transfer.total, 4);
        drop(transfer);

        assert_eq!(requested, vec![0..4]);
        assert_eq!(acct.bytes_used, 10);
    }

    #[test]
    fn test_sleep_carries_over_debt() {
        let (clock, state) = manual_state();
        let source = fixed(10, 1000);
        let mut acct = state.lock();
        acct.bytes_used = 13;
        clock.advance(Duration::from_millis(400));

        let mut transfer = Transfer::new(1, &source, &mut acct, state.clock(), None, full_chunk);
        assert_eq!(transfer.sleep(), Step::Check);
        drop(transfer);

        assert_eq!(acct.bytes_used, 3);
        assert_eq!(acct.window_start, clock.now());
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(600)]);
    }

    #[test]
    fn test_sleep_skips_wait_for_expired_window() {
        let (clock, state) = manual_state();
        let source = fixed(10, 1000);
        let mut acct = state.lock();
        acct.bytes_used = 10;
        clock.advance(Duration::from_secs(5));

        let mut transfer = Transfer::new(1, &source, &mut acct, state.clock(), None, full_chunk);
        assert_eq!(transfer.sleep(), Step::Check);
        drop(transfer);

        assert_eq!(acct.bytes_used, 0);
        assert!(clock.sleeps().is_empty());
        assert_eq!(acct.stats.sleeps, 1);
    }

    #[test]
    fn test_cancelled_sleep_leaves_accounting() {
        let (clock, state) = manual_state();
        let source = fixed(10, 1000);
        let token = CancelToken::new();
        token.cancel();

        let mut acct = state.lock();
        acct.bytes_used = 10;
        let window_start = acct.window_start;

        let result = Transfer::new(5, &source, &mut acct, state.clock(), Some(&token), full_chunk).run();
        assert!(matches!(result, Err(ThrottleError::Cancelled { transferred: 0 })));
        assert_eq!(acct.bytes_used, 10);
        assert_eq!(acct.window_start, window_start);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_run_carry_over_not_reset() {
        let (clock, state) = manual_state();
        let source = fixed(10, 1000);
        let mut acct = state.lock();

        let result = Transfer::new(25, &source, &mut acct, state.clock(), None, full_chunk).run();
        assert_eq!(result.unwrap(), 25);
        assert_eq!(acct.bytes_used, 5);
        assert_eq!(acct.stats.sleeps, 2);
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[test]
    fn test_run_failure_keeps_partial_count() {
        let (_clock, state) = manual_state();
        let source = fixed(10, 1000);
        let mut acct = state.lock();

        let mut calls = 0;
        let result = Transfer::new(30, &source, &mut acct, state.clock(), None, |r| {
            calls += 1;
            if calls == 2 {
                Chunk::failed(3, io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            } else {
                Chunk::ok(r.len())
            }
        })
        .run();

        match result {
            Err(ThrottleError::TransferFailure { transferred, source }) => {
                assert_eq!(transferred, 13);
                assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(acct.bytes_used, 3);
    }

    #[test]
    fn test_run_stops_without_progress() {
        let (_clock, state) = manual_state();
        let source = fixed(10, 1000);
        let mut acct = state.lock();

        let result = Transfer::new(8, &source, &mut acct, state.clock(), None, |r| {
            Chunk::ok(if r.start == 0 { 5 } else { 0 })
        })
        .run();
        assert_eq!(result.unwrap(), 5);
        assert_eq!(acct.bytes_used, 5);
    }

    #[test]
    fn test_overreported_count_is_clamped() {
        let (_clock, state) = manual_state();
        let source = fixed(10, 1000);
        let mut acct = state.lock();

        let result = Transfer::new(4, &source, &mut acct, state.clock(), None, |_| Chunk::ok(1000)).run();
        assert_eq!(result.unwrap(), 4);
        assert_eq!(acct.bytes_used, 4);
    }

    fn full_chunk(range: Range<usize>) -> Chunk {
        Chunk::ok(range.len())
    }
}
