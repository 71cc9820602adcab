//! Throttled stream wrapper.

use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::trace;

use super::cancel::CancelToken;
use super::capability::{Readable, Writable};
use super::engine::Transfer;
use super::quota::Quota;
use super::shared::{QuotaSource, SharedBudget};
use super::state::RateState;
use crate::error::{Direction, Result, ThrottleError};

/// A byte stream whose reads and writes are limited to a quota per window.
///
/// Each call moves the whole buffer, blocking between windows as needed.
/// All accounting lives in the referenced [`RateState`], so streams that
/// share a state share one budget.
pub struct Throttled {
    reader: Option<Box<dyn Readable>>,
    writer: Option<Box<dyn Writable>>,
    quota: QuotaSource,
    state: Arc<RateState>,
    cancel: Option<CancelToken>,
}

impl Throttled {
    /// Start building a throttled stream.
    pub fn builder() -> ThrottledBuilder {
        ThrottledBuilder::default()
    }

    /// Throttle a reader with a private rate state.
    pub fn reader<R: Readable + 'static>(reader: R, quota: Quota) -> Self {
        Self::builder().reader(reader).quota(quota).finish()
    }

    /// Throttle a writer with a private rate state.
    pub fn writer<W: Writable + 'static>(writer: W, quota: Quota) -> Self {
        Self::builder().writer(writer).quota(quota).finish()
    }

    /// Throttle a reader and a writer together with one private rate state.
    pub fn duplex<R, W>(reader: R, writer: W, quota: Quota) -> Self
    where
        R: Readable + 'static,
        W: Writable + 'static,
    {
        Self::builder()
            .reader(reader)
            .writer(writer)
            .quota(quota)
            .finish()
    }

    /// Read until `buf` is full, the source ends, or it fails.
    ///
    /// Returns the number of bytes read. On failure the error carries the
    /// bytes read before it.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let reader = self
            .reader
            .as_mut()
            .ok_or(ThrottleError::CapabilityMissing(Direction::Read))?;

        trace!(len = buf.len(), "Throttled read");
        let mut acct = self.state.lock();
        Transfer::new(
            buf.len(),
            &self.quota,
            &mut acct,
            self.state.clock(),
            self.cancel.as_ref(),
            |range| reader.read_chunk(&mut buf[range]),
        )
        .run()
    }

    /// Write all of `buf` unless the sink ends or fails.
    ///
    /// Returns the number of bytes written. On failure the error carries the
    /// bytes written before it.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(ThrottleError::CapabilityMissing(Direction::Write))?;

        trace!(len = buf.len(), "Throttled write");
        let mut acct = self.state.lock();
        Transfer::new(
            buf.len(),
            &self.quota,
            &mut acct,
            self.state.clock(),
            self.cancel.as_ref(),
            |range| writer.write_chunk(&buf[range]),
        )
        .run()
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(ThrottleError::CapabilityMissing(Direction::Write))?;
        writer.flush()?;
        Ok(())
    }

    /// Get the quota currently applied to this stream.
    pub fn quota(&self) -> Quota {
        self.quota.current()
    }

    /// Get the rate state this stream accounts against.
    pub fn state(&self) -> &Arc<RateState> {
        &self.state
    }

    /// Whether a read capability is configured.
    pub fn can_read(&self) -> bool {
        self.reader.is_some()
    }

    /// Whether a write capability is configured.
    pub fn can_write(&self) -> bool {
        self.writer.is_some()
    }
}

impl fmt::Debug for Throttled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttled")
            .field("can_read", &self.can_read())
            .field("can_write", &self.can_write())
            .field("quota", &self.quota)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

/// Partial progress is reported as success; the failure surfaces again on
/// the next call.
fn partial_or_err(result: Result<usize>) -> io::Result<usize> {
    match result {
        Ok(n) => Ok(n),
        Err(err) if err.transferred() > 0 => Ok(err.transferred()),
        Err(err) => Err(err.into()),
    }
}

impl io::Read for Throttled {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        partial_or_err(Throttled::read(self, buf))
    }
}

impl io::Write for Throttled {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        partial_or_err(Throttled::write(self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Throttled::flush(self).map_err(io::Error::from)
    }
}

/// Builder for [`Throttled`].
///
/// Without an explicit state or shared budget, the stream gets a fresh
/// private rate state. Without a quota, the default quota applies.
#[derive(Default)]
pub struct ThrottledBuilder {
    reader: Option<Box<dyn Readable>>,
    writer: Option<Box<dyn Writable>>,
    quota: Option<Quota>,
    state: Option<Arc<RateState>>,
    shared: Option<Arc<SharedBudget>>,
    cancel: Option<CancelToken>,
}

impl ThrottledBuilder {
    /// Set the read capability.
    pub fn reader<R: Readable + 'static>(mut self, reader: R) -> Self {
        self.reader = Some(Box::new(reader));
        self
    }

    /// Set the write capability.
    pub fn writer<W: Writable + 'static>(mut self, writer: W) -> Self {
        self.writer = Some(Box::new(writer));
        self
    }

    /// Use a fixed quota.
    pub fn quota(mut self, quota: Quota) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Account against an existing rate state.
    pub fn state(mut self, state: Arc<RateState>) -> Self {
        self.state = Some(state);
        self
    }

    /// Use a shared budget's rate state and live default quota.
    ///
    /// Cannot be combined with `quota` or `state`.
    pub fn shared(mut self, budget: &Arc<SharedBudget>) -> Self {
        self.shared = Some(Arc::clone(budget));
        self
    }

    /// Abort waits for quota when `token` is cancelled.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Build the stream.
    ///
    /// Fails if neither a reader nor a writer was set, or if a shared budget
    /// is combined with an explicit quota or state.
    pub fn build(self) -> Result<Throttled> {
        if self.reader.is_none() && self.writer.is_none() {
            return Err(ThrottleError::Config(
                "a throttled stream needs a reader, a writer, or both".to_string(),
            ));
        }
        if self.shared.is_some() && (self.quota.is_some() || self.state.is_some()) {
            return Err(ThrottleError::Config(
                "a shared budget supplies its own quota and state".to_string(),
            ));
        }
        Ok(self.finish())
    }

    pub(crate) fn finish(self) -> Throttled {
        let (quota, state) = match self.shared {
            Some(budget) => {
                let state = Arc::clone(budget.state());
                (QuotaSource::Shared(budget), state)
            }
            None => (
                QuotaSource::Fixed(self.quota.unwrap_or_default()),
                self.state.unwrap_or_else(RateState::shared),
            ),
        };

        Throttled {
            reader: self.reader,
            writer: self.writer,
            quota,
            state,
            cancel: self.cancel,
        }
    }
}
