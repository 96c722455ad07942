//! Wall-clock seconds used for `utime` and `author_utime`.
//!
//! Grounded on the original's `util/Clock.py`, which wraps `time.time()`
//! behind a trait so it can be swapped out in tests.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current wall-clock time, in integer seconds.
pub trait Clock: Send + Sync {
    fn unix(&self) -> i64;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// A fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn unix(&self) -> i64 {
        self.0
    }
}
