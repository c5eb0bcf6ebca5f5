// Deadline tracking shared by every blocking protocol call.
// A single PolledTimeout is created per operation and threaded through each
// read/write so that the whole operation, not each step, honours the budget.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct PolledTimeout {
    start: Instant,
    duration: Duration,
}

impl PolledTimeout {
    /// Smallest budget handed to a transfer that must still happen after the
    /// deadline passed (e.g. the payload that follows an already-sent header).
    pub const MIN_TRANSFER: Duration = Duration::from_millis(10);

    pub fn from_duration(duration: Duration) -> Self {
        Self {
            start: Instant::now(),
            duration,
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::from_duration(Duration::from_millis(millis))
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn has_expired(&self) -> bool {
        self.start.elapsed() >= self.duration
    }

    /// Time left before the deadline, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.start.elapsed())
    }

    /// Time left, but never less than `floor`.
    pub fn remaining_or_floor(&self, floor: Duration) -> Duration {
        self.remaining().max(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_timeout_not_expired() {
        let timeout = PolledTimeout::from_duration(Duration::from_secs(30));

        assert!(!timeout.has_expired(), "Should not be expired initially");
        assert!(timeout.remaining() <= Duration::from_secs(30));
        assert!(timeout.remaining() > Duration::from_secs(29));
    }

    #[test]
    fn test_timeout_expiry() {
        let timeout = PolledTimeout::from_millis(20);
        std::thread::sleep(Duration::from_millis(40));

        assert!(timeout.has_expired(), "Should be expired");
        assert_eq!(timeout.remaining(), Duration::ZERO, "No time remaining");
    }

    #[test]
    fn test_floor_applies_after_expiry() {
        let timeout = PolledTimeout::from_millis(0);

        assert_eq!(
            timeout.remaining_or_floor(PolledTimeout::MIN_TRANSFER),
            Duration::from_millis(10)
        );
    }
}
