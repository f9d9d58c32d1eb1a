//! Retry policy for guide requests.

use std::time::Duration;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Upper bound for a single backoff sleep.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Exponential backoff: `initial_delay * 2^attempt`, capped at one minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
        }
    }

    /// Retries after the first attempt.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Sleep before retrying after failed attempt number `attempt` (0-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(MAX_RETRY_DELAY, |d| d.min(MAX_RETRY_DELAY))
    }

    /// Whether `attempt` (0-based) is the final one the policy allows.
    #[must_use]
    pub const fn is_last(&self, attempt: u32) -> bool {
        attempt >= self.max_retries
    }

    /// Sleeps for the backoff of `attempt`. Returns at once after the final
    /// attempt since no retry follows.
    pub async fn wait(&self, attempt: u32) {
        if self.is_last(attempt) {
            return;
        }
        tokio::time::sleep(self.delay_for(attempt)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_per_attempt() {
        // Arrange
        let policy = RetryPolicy::new(3, Duration::from_millis(100));

        // Act & Assert
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(10), MAX_RETRY_DELAY);
        assert_eq!(policy.delay_for(u32::MAX), MAX_RETRY_DELAY);
    }

    #[tokio::test]
    async fn test_zero_delay_does_not_wait() {
        // Arrange
        let policy = RetryPolicy::new(1, Duration::ZERO);

        // Act
        let start = std::time::Instant::now();
        policy.wait(0).await;

        // Assert
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_final_attempt_does_not_wait() {
        // Arrange
        let policy = RetryPolicy::new(2, Duration::from_secs(30));

        // Act
        let start = std::time::Instant::now();
        policy.wait(2).await;
        policy.wait(7).await;

        // Assert
        assert!(policy.is_last(2));
        assert!(!policy.is_last(1));
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
