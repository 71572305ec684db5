//! Exponential backoff settings shared by reconnecting and retrying components.

use std::time::Duration;

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier applied after every failed attempt.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay that follows `current`, capped at `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        std::cmp::min(
            Duration::from_secs_f64(current.as_secs_f64() * self.multiplier),
            self.max_delay,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            multiplier: 2.0,
        };
        let d1 = retry.next_delay(retry.initial_delay);
        let d2 = retry.next_delay(d1);
        assert_eq!(d1, Duration::from_secs(2));
        assert_eq!(d2, Duration::from_secs(3));
    }
}
