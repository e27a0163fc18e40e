use std::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// The retry policy StoreConnection follows after losing, or failing to open, its connection.
///
/// Attempts are unbounded and the delay never grows: the store is assumed to come back
/// eventually, and the service must never mark itself permanently unrecoverable.
pub struct RetryPolicy {
    /// Wait between a failed attempt and the next one.
    delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    /// No wait at all between attempts, for tests.
    pub fn immediate() -> Self {
        Self::fixed(Duration::ZERO)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Calculate the time until the next attempt. The attempt number is only
    /// informational, it never changes the answer.
    pub fn time_until_next_retry(&self, _attempt: u64) -> Duration {
        self.delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
        }
    }
}
