//! Retry logic with exponential backoff for store operations

use std::thread;
use std::time::Duration;

use tracing::warn;

use super::{StoreError, StoreResult};

/// Retry policy for transient store failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retry attempts after the initial try
    pub attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Backoff cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries (used by tests and dry-runs)
    pub fn none() -> Self {
        Self {
            attempts: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff delay before retry `attempt` (1-based), doubling each
    /// time up to the cap
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Execute a store operation, retrying transient failures with
/// exponential backoff.
///
/// Non-retriable errors surface immediately; after the attempt budget is
/// exhausted the last error is returned.
pub fn with_retry<T, F>(policy: &RetryPolicy, operation_name: &str, mut operation: F) -> StoreResult<T>
where
    F: FnMut() -> StoreResult<T>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retriable() && attempt < policy.attempts => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = policy.attempts,
                    ?delay,
                    error = %e,
                    "transient store failure, retrying"
                );
                thread::sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_succeeds_first_try() {
        let policy = RetryPolicy::default();
        let result: StoreResult<u32> = with_retry(&policy, "test", || Ok(7));
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_retries_transient_then_succeeds() {
        let policy = RetryPolicy {
            attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        };
        let mut calls = 0;
        let result = with_retry(&policy, "test", || {
            calls += 1;
            if calls < 3 {
                Err(StoreError::Network {
                    message: "flaky".to_string(),
                })
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_fatal_error_short_circuits() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let result: StoreResult<()> = with_retry(&policy, "test", || {
            calls += 1;
            Err(StoreError::not_found("x", "memory"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_budget_exhaustion_returns_last_error() {
        let policy = RetryPolicy {
            attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let mut calls = 0;
        let result: StoreResult<()> = with_retry(&policy, "test", || {
            calls += 1;
            Err(StoreError::Network {
                message: "down".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(3));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
    }
}
