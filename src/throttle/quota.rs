//! Quota definition and rate-size parsing.

use std::time::Duration;

use crate::error::{Result, ThrottleError};

/// Default byte limit per window (1 MiB).
pub const DEFAULT_LIMIT: u64 = 1024 * 1024;
/// Default window duration.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Maximum number of bytes permitted per accounting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quota {
    limit: u64,
    window: Duration,
}

impl Quota {
    /// Create a new quota.
    ///
    /// Both values must be positive, and the limit must fit the signed
    /// accounting counter.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(ThrottleError::InvalidQuota(
                "limit must be greater than zero".to_string(),
            ));
        }
        if limit > i64::MAX as u64 {
            return Err(ThrottleError::InvalidQuota(format!(
                "limit {} exceeds {}",
                limit,
                i64::MAX
            )));
        }
        if window.is_zero() {
            return Err(ThrottleError::InvalidQuota(
                "window must be greater than zero".to_string(),
            ));
        }
        Ok(Self { limit, window })
    }

    /// Create a quota of `limit` bytes per second.
    pub fn per_second(limit: u64) -> Result<Self> {
        Self::new(limit, Duration::from_secs(1))
    }

    /// Get the byte limit per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Get the window duration.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// The limit as a signed value, comparable with the accounting counter.
    pub(crate) fn signed_limit(&self) -> i64 {
        // Bounded by the constructor.
        self.limit as i64
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Parse a human-readable byte size such as `"512"`, `"64K"`, `"10MB"` or `"1G"`.
///
/// Suffixes are binary multiples and case-insensitive. Fractions are allowed
/// with a suffix (`"1.5M"`).
pub fn parse_size(size: &str) -> Result<u64> {
    let normalized = size.trim().to_uppercase();
    let digits = normalized.trim_end_matches('B');

    let (num_str, multiplier) = match digits.chars().last() {
        Some('K') => (&digits[..digits.len() - 1], 1024u64),
        Some('M') => (&digits[..digits.len() - 1], 1024 * 1024),
        Some('G') => (&digits[..digits.len() - 1], 1024 * 1024 * 1024),
        _ => (digits, 1),
    };

    let invalid = || ThrottleError::InvalidQuota(format!("invalid size: {:?}", size));

    if let Ok(whole) = num_str.parse::<u64>() {
        return whole.checked_mul(multiplier).ok_or_else(invalid);
    }

    let num: f64 = num_str.parse().map_err(|_| invalid())?;
    if !num.is_finite() || num < 0.0 {
        return Err(invalid());
    }
    let bytes = num * multiplier as f64;
    if bytes > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes as u64)
}
