//! Bandwidth - windowed throttling for byte streams
//!
//! This crate wraps blocking readers and writers so that every transfer is
//! limited to a fixed number of bytes per time window. Streams can keep a
//! private budget or compete for one shared budget, which caps the aggregate
//! bandwidth of many simultaneously open streams.

pub mod config;
pub mod error;
pub mod throttle;

pub use error::{Direction, Result, ThrottleError};
pub use throttle::{CancelToken, Quota, RateState, SharedBudget, Throttled};
