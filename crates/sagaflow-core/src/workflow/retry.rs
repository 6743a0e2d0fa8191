//! Explicit per-step retry policy.
//!
//! A step is re-invoked only when it carries a `RetryConfig`, has attempts
//! left, and failed with a retryable error. Validation failures (not
//! allowed, invalid data, not found) are never retried.

use std::time::Duration;

use sagaflow_types::workflow::RetryConfig;

use super::step::StepError;

/// Stateless retry decisions.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether to attempt again after `attempt` (1-based) failed with `error`.
    pub fn should_retry(config: Option<&RetryConfig>, attempt: u32, error: &StepError) -> bool {
        match config {
            Some(config) => attempt < config.max_attempts && error.is_retryable(),
            None => false,
        }
    }

    /// Delay before the next attempt.
    pub fn delay(config: Option<&RetryConfig>) -> Duration {
        config.map(RetryConfig::interval).unwrap_or(Duration::ZERO)
    }
}
