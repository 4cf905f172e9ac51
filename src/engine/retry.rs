//! Retry policy for transiently failing tasks.

use std::time::Duration;

/// Bounded exponential backoff.
///
/// A task is attempted at most `max_attempts` times, and no retry is
/// scheduled unless it can start before `budget` has elapsed since the first
/// attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Total time a task may spend retrying.
    pub budget: Duration,
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        budget: Duration,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            budget,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before the retry following failed attempt number `attempt`
    /// (1-based). A delay requested by the error itself wins when longer;
    /// neither exceeds `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, requested: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let backoff = self
            .initial_delay
            .saturating_mul(2_u32.saturating_pow(exponent))
            .min(self.max_delay);
        requested
            .map_or(backoff, |r| r.max(backoff))
            .min(self.max_delay)
    }

    /// Delay before the next attempt after `attempts` failed attempts and
    /// `elapsed` time, or `None` when the attempts are used up or the retry
    /// could not start within the remaining budget.
    #[must_use]
    pub fn next_delay(
        &self,
        attempts: u32,
        elapsed: Duration,
        requested: Option<Duration>,
    ) -> Option<Duration> {
        if attempts >= self.max_attempts {
            return None;
        }
        let remaining = self.budget.checked_sub(elapsed)?;
        let delay = self.delay_for(attempts, requested);
        (delay < remaining).then_some(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            5,
            Duration::from_secs(1),
            Duration::from_secs(10),
            Duration::from_secs(600),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1, None), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2, None), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4, None), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5, None), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40, None), Duration::from_secs(10));
    }

    #[test]
    fn test_requested_delay_wins_when_longer() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(
            policy.delay_for(3, Some(Duration::from_millis(10))),
            Duration::from_secs(4)
        );
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(3600))),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_attempt_and_budget_bounds() {
        let policy = RetryPolicy::new(
            3,
            Duration::from_millis(1),
            Duration::from_millis(5),
            Duration::from_secs(1),
        );
        assert_eq!(
            policy.next_delay(2, Duration::ZERO, None),
            Some(Duration::from_millis(2))
        );
        assert_eq!(policy.next_delay(3, Duration::ZERO, None), None);
        assert_eq!(policy.next_delay(1, Duration::from_secs(2), None), None);
        assert_eq!(RetryPolicy::no_retry().next_delay(1, Duration::ZERO, None), None);
    }

    #[test]
    fn test_retry_that_would_overrun_budget_is_refused() {
        let policy = RetryPolicy::new(
            10,
            Duration::from_millis(100),
            Duration::from_secs(5),
            Duration::from_secs(1),
        );
        assert_eq!(
            policy.next_delay(1, Duration::from_millis(850), None),
            Some(Duration::from_millis(100))
        );
        assert_eq!(policy.next_delay(1, Duration::from_millis(950), None), None);
        assert_eq!(
            policy.next_delay(1, Duration::ZERO, Some(Duration::from_secs(30))),
            None
        );
    }
}
