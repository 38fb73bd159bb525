//! # Exponential Backoff
//!
//! Per-policy retry delay used by the runtime error policy.
//!
//! The delay doubles after every consecutive failure and is capped at the
//! configured maximum. A successful pass resets the sequence.
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use vault_unseal_controller::controller::backoff::ExponentialBackoff;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(5), Duration::from_secs(30));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(10));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(20));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(30));
//! ```

use std::time::Duration;

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// First delay, also used after a reset
    start: Duration,
    /// Delay returned by the next call
    current: Duration,
    /// Upper bound
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a backoff starting at `start` and capped at `max`
    ///
    /// `max` below `start` is raised to `start`.
    #[must_use]
    pub fn new(start: Duration, max: Duration) -> Self {
        let start = start.max(Duration::from_secs(1));
        Self {
            start,
            current: start,
            max: max.max(start),
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        result
    }

    /// Reset to the starting delay
    pub fn reset(&mut self) {
        self.current = self.start;
    }
}
