use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retries with a per-attempt timeout that grows geometrically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts at establishing a connection, including the first.
    pub connect_attempts: u32,
    /// Attempts at reading a single chunk, including the first.
    pub read_attempts: u32,
    /// Timeout of the first attempt.
    #[serde(with = "lectern_model::millis")]
    pub base_timeout: Duration,
    /// Growth factor of the timeout from one attempt to the next.
    pub multiplier: f64,
    #[serde(with = "lectern_model::millis")]
    pub max_timeout: Duration,
    /// Pause between two connection attempts.
    #[serde(with = "lectern_model::millis")]
    pub static_sleep: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_attempts: 4,
            read_attempts: 4,
            base_timeout: Duration::from_secs(5),
            multiplier: 2.0,
            max_timeout: Duration::from_secs(60),
            static_sleep: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Timeout for the zero-based `attempt`: `base × multiplier^attempt`,
    /// capped at `max_timeout`.
    pub fn timeout(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let seconds = self.base_timeout.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(seconds).map_or(self.max_timeout, |timeout| timeout.min(self.max_timeout))
    }

    /// Whether a connection attempt that failed with `error` should be
    /// followed by another one.
    pub fn should_retry(&self, error: &TransportError, attempt: u32) -> bool {
        error.is_retryable() && attempt.saturating_add(1) < self.connect_attempts
    }
}
