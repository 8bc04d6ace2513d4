//! Node retry policy.
//!
//! Off by default; when set, only `Transient` node errors are retried — other
//! kinds (permission, bad arguments, interrupts) are never worth a second run.

use std::time::Duration;

/// Retry policy for node execution.
#[derive(Debug, Clone, Default)]
pub enum RetryPolicy {
    /// Fail immediately on error.
    #[default]
    None,
    /// Retry with a constant delay between attempts.
    Fixed {
        max_attempts: usize,
        interval: Duration,
    },
}

impl RetryPolicy {
    pub fn none() -> Self {
        RetryPolicy::None
    }

    pub fn fixed(max_attempts: usize, interval: Duration) -> Self {
        RetryPolicy::Fixed {
            max_attempts,
            interval,
        }
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: usize) -> bool {
        match self {
            RetryPolicy::None => false,
            RetryPolicy::Fixed { max_attempts, .. } => attempt < *max_attempts,
        }
    }

    /// Delay before the next attempt.
    pub fn delay(&self) -> Duration {
        match self {
            RetryPolicy::None => Duration::ZERO,
            RetryPolicy::Fixed { interval, .. } => *interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: None never retries; Fixed retries up to max_attempts with its interval.
    #[test]
    fn policy_bounds() {
        assert!(!RetryPolicy::none().should_retry(0));
        let p = RetryPolicy::fixed(2, Duration::from_millis(5));
        assert!(p.should_retry(0));
        assert!(p.should_retry(1));
        assert!(!p.should_retry(2));
        assert_eq!(p.delay(), Duration::from_millis(5));
    }
}
