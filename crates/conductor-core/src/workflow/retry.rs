//! Retry decisions and backoff delays for step execution.
//!
//! Stateless: all logic is in associated functions that take the policy as a
//! parameter, so the same handler serves every step and every workflow.

use std::time::Duration;

use rand::Rng;

use conductor_types::error::ErrorInfo;
use conductor_types::workflow::{BackoffStrategy, RetryPolicy};

/// Jitter adds at most this fraction of the base delay.
const JITTER_FRACTION: f64 = 0.1;

/// Stateless retry handler for step failures.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether another attempt should follow the failed `attempt` (1-based).
    ///
    /// Only recoverable errors are retried; configuration, validation and
    /// permission errors are never recoverable.
    pub fn should_retry(policy: &RetryPolicy, attempt: u32, error: &ErrorInfo) -> bool {
        attempt < policy.max_attempts && error.recoverable && !error.category.is_always_fatal()
    }

    /// Deterministic delay before the attempt following `attempt`.
    ///
    /// Fixed: `initial_delay`. Exponential: `initial_delay * 2^(attempt-1)`.
    /// Both are capped at `max_delay`.
    pub fn base_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        let initial = policy.initial_delay_ms;
        let ms = match policy.backoff {
            BackoffStrategy::Fixed => initial,
            BackoffStrategy::Exponential => {
                let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(factor)
            }
        };
        Duration::from_millis(ms.min(policy.max_delay_ms))
    }

    /// Delay with optional jitter, still capped at `max_delay`.
    pub fn delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        let base = Self::base_delay(policy, attempt);
        if !policy.jitter || base.is_zero() {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..=JITTER_FRACTION);
        let jittered = base.mul_f64(1.0 + extra);
        jittered.min(Duration::from_millis(policy.max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::error::ErrorCategory;

    fn policy(backoff: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter: false,
        }
    }

    fn error(category: ErrorCategory, recoverable: bool) -> ErrorInfo {
        ErrorInfo::new(category, "boom").recoverable(recoverable)
    }

    #[test]
    fn retries_recoverable_until_max_attempts() {
        let p = policy(BackoffStrategy::Fixed);
        let err = error(ErrorCategory::ExternalDependency, true);
        assert!(RetryHandler::should_retry(&p, 1, &err));
        assert!(RetryHandler::should_retry(&p, 2, &err));
        assert!(!RetryHandler::should_retry(&p, 3, &err), "attempt 3 is the last");
    }

    #[test]
    fn never_retries_caller_fault_categories() {
        let p = policy(BackoffStrategy::Fixed);
        for category in [ErrorCategory::Permission, ErrorCategory::Validation, ErrorCategory::Configuration] {
            let mut err = ErrorInfo::new(category, "nope");
            err.recoverable = true;
            assert!(!RetryHandler::should_retry(&p, 1, &err), "{category}");
        }
    }

    #[test]
    fn non_recoverable_execution_not_retried() {
        let p = policy(BackoffStrategy::Fixed);
        assert!(!RetryHandler::should_retry(&p, 1, &error(ErrorCategory::Execution, false)));
        assert!(RetryHandler::should_retry(&p, 1, &error(ErrorCategory::Execution, true)));
    }

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let p = policy(BackoffStrategy::Exponential);
        assert_eq!(RetryHandler::base_delay(&p, 1), Duration::from_millis(100));
        assert_eq!(RetryHandler::base_delay(&p, 2), Duration::from_millis(200));
        assert_eq!(RetryHandler::base_delay(&p, 3), Duration::from_millis(400));
        assert_eq!(RetryHandler::base_delay(&p, 5), Duration::from_millis(1_000));
        assert_eq!(RetryHandler::base_delay(&p, 80), Duration::from_millis(1_000));
    }

    #[test]
    fn fixed_delay_is_constant() {
        let p = policy(BackoffStrategy::Fixed);
        assert_eq!(RetryHandler::base_delay(&p, 1), RetryHandler::base_delay(&p, 7));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut p = policy(BackoffStrategy::Exponential);
        p.jitter = true;
        for attempt in 1..=6 {
            let base = RetryHandler::base_delay(&p, attempt);
            let delay = RetryHandler::delay(&p, attempt);
            assert!(delay >= base);
            assert!(delay <= base.mul_f64(1.0 + JITTER_FRACTION) + Duration::from_millis(1));
            assert!(delay <= Duration::from_millis(p.max_delay_ms));
        }
    }
}
