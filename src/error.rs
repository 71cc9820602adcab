//! Error types for bandwidth throttling.

use std::fmt;
use std::io;

use thiserror::Error;

/// Direction of a throttled transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Bytes flow from the underlying source into the caller's buffer.
    Read,
    /// Bytes flow from the caller's buffer into the underlying sink.
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => write!(f, "read"),
            Direction::Write => write!(f, "write"),
        }
    }
}

/// Main error type for throttled transfers.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// The wrapper was built without a capability for this direction
    #[error("No {0} capability configured")]
    CapabilityMissing(Direction),

    /// The underlying reader or writer reported a failure
    #[error("Transfer failed after {transferred} bytes: {source}")]
    TransferFailure {
        transferred: usize,
        #[source]
        source: io::Error,
    },

    /// The transfer was aborted while waiting for quota
    #[error("Transfer cancelled after {transferred} bytes")]
    Cancelled { transferred: usize },

    /// Quota values out of range
    #[error("Invalid quota: {0}")]
    InvalidQuota(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ThrottleError {
    /// Bytes moved before the error occurred.
    ///
    /// Zero for errors raised before any transfer was attempted.
    pub fn transferred(&self) -> usize {
        match self {
            ThrottleError::TransferFailure { transferred, .. }
            | ThrottleError::Cancelled { transferred } => *transferred,
            _ => 0,
        }
    }
}

impl From<ThrottleError> for io::Error {
    fn from(err: ThrottleError) -> Self {
        match err {
            ThrottleError::TransferFailure { source, .. } => source,
            ThrottleError::Io(e) => e,
            ThrottleError::CapabilityMissing(_) => {
                io::Error::new(io::ErrorKind::Unsupported, err)
            }
            ThrottleError::InvalidQuota(_) | ThrottleError::Config(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, err)
            }
            ThrottleError::Cancelled { .. } => io::Error::new(io::ErrorKind::Other, err),
        }
    }
}

/// Result type alias for throttling operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transferred_count() {
        let err = ThrottleError::TransferFailure {
            transferred: 7,
            source: io::Error::new(io::ErrorKind::BrokenPipe, "gone"),
        };
        assert_eq!(err.transferred(), 7);
        assert_eq!(ThrottleError::Cancelled { transferred: 3 }.transferred(), 3);
        assert_eq!(ThrottleError::CapabilityMissing(Direction::Write).transferred(), 0);
    }

    #[test]
    fn test_io_conversion_keeps_source() {
        let err = ThrottleError::TransferFailure {
            transferred: 0,
            source: io::Error::new(io::ErrorKind::BrokenPipe, "gone"),
        };
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);

        let io_err: io::Error = ThrottleError::CapabilityMissing(Direction::Read).into();
        assert_eq!(io_err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn test_display() {
        let err = ThrottleError::CapabilityMissing(Direction::Write);
        assert_eq!(err.to_string(), "No write capability configured");
    }
}
