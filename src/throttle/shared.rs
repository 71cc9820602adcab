//! Shared default budget.
//!
//! A [`SharedBudget`] bundles one rate state with a reconfigurable default
//! quota. Every stream built against the same budget competes for the same
//! bytes, which limits aggregate bandwidth across many open streams. The
//! budget is an ordinary value: callers that want shared behavior are handed
//! the same `Arc<SharedBudget>`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::info;

use super::capability::{Readable, Writable};
use super::clock::Clock;
use super::quota::Quota;
use super::state::RateState;
use super::stream::Throttled;
use crate::error::Result;

/// The rate state and default quota shared by opted-in streams.
#[derive(Debug)]
pub struct SharedBudget {
    state: Arc<RateState>,
    quota: RwLock<Quota>,
}

impl SharedBudget {
    /// Create a shared budget with the given default quota.
    pub fn new(quota: Quota) -> Arc<Self> {
        Arc::new(Self {
            state: RateState::shared(),
            quota: RwLock::new(quota),
        })
    }

    /// Create a shared budget measured against a specific clock.
    pub fn with_clock(quota: Quota, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(RateState::with_clock(clock)),
            quota: RwLock::new(quota),
        })
    }

    /// Replace the default quota.
    ///
    /// Streams using this budget observe the new quota at their next check.
    pub fn set_default_quota(&self, limit: u64, window: Duration) -> Result<()> {
        let quota = Quota::new(limit, window)?;
        *self.quota.write() = quota;
        info!(limit, window = ?window, "Default quota updated");
        Ok(())
    }

    /// Get the current default quota.
    pub fn default_quota(&self) -> Quota {
        *self.quota.read()
    }

    /// Get the shared rate state.
    pub fn state(&self) -> &Arc<RateState> {
        &self.state
    }

    /// Throttle a reader against this budget.
    pub fn reader<R: Readable + 'static>(self: &Arc<Self>, reader: R) -> Throttled {
        Throttled::builder()
            .reader(reader)
            .shared(self)
            .finish()
    }

    /// Throttle a writer against this budget.
    pub fn writer<W: Writable + 'static>(self: &Arc<Self>, writer: W) -> Throttled {
        Throttled::builder()
            .writer(writer)
            .shared(self)
            .finish()
    }

    /// Throttle a reader and a writer together against this budget.
    pub fn duplex<R, W>(self: &Arc<Self>, reader: R, writer: W) -> Throttled
    where
        R: Readable + 'static,
        W: Writable + 'static,
    {
        Throttled::builder()
            .reader(reader)
            .writer(writer)
            .shared(self)
            .finish()
    }
}

impl Default for SharedBudget {
    fn default() -> Self {
        Self {
            state: RateState::shared(),
            quota: RwLock::new(Quota::default()),
        }
    }
}

/// Where a stream reads its quota from.
#[derive(Debug, Clone)]
pub(crate) enum QuotaSource {
    /// Fixed at construction
    Fixed(Quota),
    /// The live default of a shared budget
    Shared(Arc<SharedBudget>),
}

impl QuotaSource {
    /// Get the quota in effect right now.
    pub(crate) fn current(&self) -> Quota {
        match self {
            QuotaSource::Fixed(quota) => *quota,
            QuotaSource::Shared(budget) => budget.default_quota(),
        }
    }
}
