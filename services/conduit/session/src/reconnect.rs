//! Client reconnect pacing.

use std::time::Duration;
use tokio::time::Instant;

/// Spaces dial attempts at least `interval` apart; the first attempt is immediate
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    interval: Duration,
    last_attempt: Option<Instant>,
}

impl ReconnectPolicy {
    /// Create a policy with the given spacing
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_attempt: None,
        }
    }

    /// When the next attempt may start, `None` if it may start now
    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.last_attempt.map(|at| at + self.interval)
    }

    /// Record that an attempt started at `now`
    pub fn record_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_immediate() {
        let policy = ReconnectPolicy::new(Duration::from_secs(1));
        assert_eq!(policy.next_attempt_at(), None);
    }

    #[test]
    fn test_attempts_spaced_by_interval() {
        let start = Instant::now();
        let mut policy = ReconnectPolicy::new(Duration::from_millis(500));

        policy.record_attempt(start);
        assert_eq!(policy.next_attempt_at(), Some(start + Duration::from_millis(500)));

        // Spacing runs from the latest attempt, however late it started
        let second = start + Duration::from_millis(700);
        policy.record_attempt(second);
        assert_eq!(policy.next_attempt_at(), Some(second + Duration::from_millis(500)));
    }
}
