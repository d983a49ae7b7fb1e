//! Backoff schedule for retried backend calls.

use std::time::Duration;

use duckgate_core::RetryConfig;
use rand::Rng;
use tracing::debug;

use crate::backend::BackendError;

/// Jittered exponential backoff plus the rotation threshold.
///
/// The delay before retry `n` (1-based) is
/// `initial_delay * multiplier^(n-1)`, capped at `max_delay`, then spread by
/// `±jitter` of itself. A server `Retry-After` hint replaces the computed
/// delay when it is longer.
///
/// # Examples
///
/// ```
/// use duckgate_core::RetryConfig;
/// use duckgate_review::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(&RetryConfig { jitter: 0.0, ..RetryConfig::default() });
/// assert_eq!(policy.backoff(1), Duration::from_millis(500));
/// assert_eq!(policy.backoff(2), Duration::from_millis(1000));
/// assert_eq!(policy.backoff(3), Duration::from_millis(2000));
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
    rotate_after: u32,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier.max(1.0),
            jitter: config.jitter.clamp(0.0, 1.0),
            rotate_after: config.rotate_after.max(1),
        }
    }

    /// Attempts per batch on one backend, first try included.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Consecutive rate limits that degrade a backend.
    pub fn rotate_after(&self) -> u32 {
        self.rotate_after
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        let base_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let mut delay_ms = base_ms.min(self.max_delay.as_millis() as f64);

        if self.jitter > 0.0 && delay_ms > 0.0 {
            let spread = delay_ms * self.jitter;
            delay_ms = (delay_ms + rand::rng().random_range(-spread..=spread)).max(0.0);
        }
        Duration::from_micros((delay_ms * 1000.0).round() as u64)
    }

    /// Delay before retrying after `error`, honouring any `Retry-After` hint.
    pub fn delay_for(&self, error: &BackendError, retry: u32) -> Duration {
        let backoff = self.backoff(retry);
        match error.retry_after() {
            Some(hint) => {
                let delay = hint.max(backoff);
                debug!(
                    retry_after_ms = hint.as_millis() as u64,
                    backoff_ms = backoff.as_millis() as u64,
                    delay_ms = delay.as_millis() as u64,
                    "respecting Retry-After hint"
                );
                delay
            }
            None => backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}
