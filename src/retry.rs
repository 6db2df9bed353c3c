//! Retry logic with exponential backoff
//!
//! Transient API failures (rate limiting, network errors, 5xx) are retried
//! with exponentially growing delays; everything else fails immediately.
//!
//! - Attempt 1: no delay
//! - Attempt 2: `initial_backoff`
//! - Attempt 3: `2 * initial_backoff`
//! - ... capped at `max_backoff` (the configured ceiling, default 300s)
//!
//! A rate-limit response carrying `Retry-After` waits at least that long,
//! still bounded by the ceiling.

use std::time::Duration;

use crate::data::ApiError;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Cap for exponential growth
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    /// Calculate backoff delay for a given attempt number (0-indexed)
    ///
    /// # Arguments
    /// * `attempt` - The attempt number (0 = first attempt, 1 = first retry, etc.)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 2u32.saturating_pow(attempt - 1);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Delay before `attempt`, honouring a server-requested wait if larger
    pub fn delay_for(&self, attempt: u32, error: &ApiError) -> Duration {
        let backoff = self.backoff_duration(attempt);
        match error {
            ApiError::RateLimited {
                retry_after: Some(wait),
            } => backoff.max(*wait).min(self.max_backoff),
            _ => backoff,
        }
    }

    /// Check if we should retry after `attempt` (0-indexed) failed with `error`
    pub fn should_retry(&self, attempt: u32, error: &ApiError) -> bool {
        if attempt + 1 >= self.max_attempts {
            return false;
        }

        error.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(4, Duration::from_millis(100), Duration::from_millis(1000))
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.max_backoff, Duration::from_secs(300));
    }

    #[test]
    fn test_backoff_grows_exponentially_and_caps() {
        let policy = policy();
        assert_eq!(policy.backoff_duration(0), Duration::ZERO);
        assert_eq!(policy.backoff_duration(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_duration(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_duration(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_duration(5), Duration::from_millis(1000));
        assert_eq!(policy.backoff_duration(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_retry_after_raises_delay_but_respects_ceiling() {
        let policy = policy();
        let short = ApiError::RateLimited {
            retry_after: Some(Duration::from_millis(500)),
        };
        let long = ApiError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        };

        assert_eq!(policy.delay_for(1, &short), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1, &long), Duration::from_millis(1000));
        assert_eq!(
            policy.delay_for(2, &ApiError::Network("reset".into())),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn test_only_transient_errors_are_retried() {
        let policy = policy();
        assert!(policy.should_retry(0, &ApiError::Network("reset".into())));
        assert!(policy.should_retry(0, &ApiError::RateLimited { retry_after: None }));
        assert!(!policy.should_retry(0, &ApiError::Auth { status: 401 }));
        assert!(!policy.should_retry(0, &ApiError::MalformedResponse("bad".into())));
    }

    #[test]
    fn test_attempts_are_bounded() {
        let policy = policy();
        let err = ApiError::Network("reset".into());
        assert!(policy.should_retry(2, &err));
        assert!(!policy.should_retry(3, &err), "fourth attempt is the last");
    }
}
