// SPDX-License-Identifier: MIT OR Apache-2.0
//! Exponential backoff schedule for polling loops.

use std::time::Duration;

/// Doubling backoff with a cap.  The Athena poller starts at 200 ms and
/// never sleeps longer than 5 s between state checks.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    cap: Duration,
}

impl Backoff {
    /// Schedule used for Athena execution polling.
    pub fn athena() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_secs(5))
    }

    /// Start at `initial`, double per step, never exceed `cap`.
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            current: initial,
            cap,
        }
    }

    /// The next sleep interval.  Each call advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.cap);
        delay
    }

    /// The interval the next call to [`next_delay`](Self::next_delay)
    /// would return, without advancing.
    pub fn peek(&self) -> Duration {
        self.current
    }
}
