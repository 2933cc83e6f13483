//! Shared time budget for one dial.
//!
//! Resolution and the socket connect draw from the same deadline. Once the
//! budget is spent every later step fails fast instead of starting with no
//! time left.

use std::io;
use std::time::{Duration, Instant};

/// Point in time after which a dial must give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    expires_at: Option<Instant>,
}

impl Deadline {
    /// Deadline `timeout` from now. Overflowing durations mean no deadline.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self {
            expires_at: Instant::now().checked_add(timeout),
        }
    }

    /// Deadline that never expires.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self { expires_at: None }
    }

    /// Time left, or `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| expires_at.saturating_duration_since(Instant::now()))
    }

    /// Whether the budget is spent.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Non-zero time left for the next blocking step.
    ///
    /// # Errors
    ///
    /// Returns an [`io::ErrorKind::TimedOut`] error when the budget is spent.
    pub fn budget(&self) -> io::Result<Option<Duration>> {
        match self.remaining() {
            Some(left) if left.is_zero() => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "dial deadline exhausted",
            )),
            other => Ok(other),
        }
    }
}
