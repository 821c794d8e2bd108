use std::time::Duration;

/// Backoff schedule for retrying transient service errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_interval: Duration,
    pub maximum_attempts: usize,
}

impl RetryPolicy {
    /// The schedule applied to service operations the core performs itself (heartbeat RPCs).
    pub fn service_operation() -> Self {
        Self {
            initial_interval: Duration::from_millis(20),
            backoff_coefficient: 1.2,
            maximum_interval: Duration::from_secs(6),
            maximum_attempts: 5,
        }
    }

    /// Ask this retry policy if a retry should be performed. Caller provides the current attempt
    /// number - the first attempt should start at 1.
    ///
    /// Returns `None` if it should not, otherwise a duration indicating how long to wait before
    /// performing the retry.
    pub fn should_retry(&self, attempt_number: usize) -> Option<Duration> {
        if attempt_number >= self.maximum_attempts {
            return None;
        }
        if attempt_number <= 1 {
            return Some(self.initial_interval);
        }
        let coeff = if self.backoff_coefficient > 0. {
            self.backoff_coefficient
        } else {
            2.0
        };
        let interval = self
            .initial_interval
            .mul_f64(coeff.powi(attempt_number as i32 - 1));
        Some(interval.min(self.maximum_interval))
    }
}
