//! Wait deadlines.
//!
//! A [`Timeout`] is either a finite duration or infinite. Durations of zero
//! or less given in milliseconds are treated as infinite.

use std::{
    fmt,
    time::{Duration, Instant},
};

/// How long a wait may block before giving up.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Timeout(Option<Duration>);

impl Timeout {
    /// Wait forever.
    pub const INFINITE: Self = Self(None);

    /// Create a timeout from milliseconds. Values `<= 0` mean infinite.
    #[must_use]
    pub fn from_millis(millis: f32) -> Self {
        if millis > 0.0 && millis.is_finite() {
            Self(Some(Duration::from_secs_f32(millis / 1000.0)))
        } else {
            Self::INFINITE
        }
    }

    /// Create a timeout from a duration. A zero duration means infinite.
    #[must_use]
    pub const fn from_duration(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::INFINITE
        } else {
            Self(Some(duration))
        }
    }

    /// Returns the finite duration, or `None` when infinite.
    #[must_use]
    pub const fn duration(self) -> Option<Duration> {
        self.0
    }

    #[must_use]
    pub const fn is_infinite(self) -> bool {
        self.0.is_none()
    }

    /// Start measuring elapsed time against this timeout.
    #[must_use]
    pub fn start(self) -> TimeoutCounter {
        TimeoutCounter {
            timeout: self,
            started: Instant::now(),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self::from_duration(duration)
    }
}

impl fmt::Debug for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(duration) => write!(f, "Timeout({duration:?})"),
            None => write!(f, "Timeout(infinite)"),
        }
    }
}

/// Tracks how much of a [`Timeout`] has been used up.
#[derive(Clone, Copy, Debug)]
pub struct TimeoutCounter {
    timeout: Timeout,
    started: Instant,
}

impl TimeoutCounter {
    /// Returns true once a finite timeout has elapsed. Never true for infinite timeouts.
    #[must_use]
    pub fn has_finished(&self) -> bool {
        self.timeout
            .duration()
            .is_some_and(|limit| self.started.elapsed() >= limit)
    }

    /// Time left before the deadline, or `None` when infinite.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.timeout
            .duration()
            .map(|limit| limit.saturating_sub(self.started.elapsed()))
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
