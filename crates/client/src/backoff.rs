//! Exponential-backoff policy for reconnect attempts.
//!
//! The delay before the n-th reconnect since the last successful open is
//! `min(initial_delay * multiplier^n, max_delay)`. There is no retry
//! limit: the connection keeps retrying until it is explicitly
//! disconnected.

use std::time::Duration;

/// Reconnect timing. Defaults: 1s, doubling, capped at 30s.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Wait before the first reconnect after a drop.
    pub initial_delay: Duration,
    /// Ceiling for any single wait.
    pub max_delay: Duration,
    /// Growth factor applied per scheduled reconnect.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Grow `current` by the multiplier, never past `max_delay`.
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Running backoff state owned by the connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    retry_count: u32,
    current: Duration,
}

impl Backoff {
    /// Start at the initial delay with no retries recorded.
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial_delay.min(config.max_delay);
        Self {
            config,
            retry_count: 0,
            current,
        }
    }

    /// Delay for the n-th attempt (zero-based) without touching the state.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.config.initial_delay.min(self.config.max_delay);
        for _ in 0..attempt {
            let next = next_delay(delay, &self.config);
            if next == delay {
                break;
            }
            delay = next;
        }
        delay
    }

    /// Consume the current delay for a newly scheduled attempt.
    ///
    /// Increments the retry count by one and advances the delay for the
    /// following attempt.
    pub fn next_attempt(&mut self) -> Duration {
        let delay = self.current;
        self.retry_count = self.retry_count.saturating_add(1);
        self.current = next_delay(self.current, &self.config);
        delay
    }

    /// Back to the initial delay; called when a connection opens.
    pub fn reset(&mut self) {
        self.retry_count = 0;
        self.current = self.config.initial_delay.min(self.config.max_delay);
    }

    /// Attempts scheduled since the last reset.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Delay the next scheduled attempt will wait.
    pub fn current_delay(&self) -> Duration {
        self.current
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_multiplier_grows_until_cap() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 3.0,
        });
        let delays: Vec<u64> = (0..5).map(|_| backoff.next_attempt().as_secs()).collect();
        assert_eq!(delays, vec![2, 6, 18, 54, 60]);
    }

    #[test]
    fn initial_delay_above_max_is_clamped() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial_delay: Duration::from_secs(45),
            ..Default::default()
        });
        assert_eq!(backoff.current_delay(), Duration::from_secs(30));
        assert_eq!(backoff.next_attempt(), Duration::from_secs(30));
        assert_eq!(backoff.delay_for(0), Duration::from_secs(30));
    }

    #[test]
    fn unit_multiplier_keeps_delay_constant() {
        let mut backoff = Backoff::new(BackoffConfig {
            multiplier: 1.0,
            ..Default::default()
        });
        for _ in 0..4 {
            assert_eq!(backoff.next_attempt(), Duration::from_secs(1));
        }
        assert_eq!(backoff.delay_for(10), Duration::from_secs(1));
        assert_eq!(backoff.retry_count(), 4);
    }

    #[test]
    fn attempts_follow_capped_doubling() {
        let mut backoff = Backoff::default();
        let expected_ms = [1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000];

        for (n, &ms) in expected_ms.iter().enumerate() {
            assert_eq!(backoff.delay_for(n as u32), Duration::from_millis(ms));
            assert_eq!(backoff.next_attempt(), Duration::from_millis(ms));
            assert_eq!(backoff.retry_count(), n as u32 + 1);
        }
    }

    #[test]
    fn delays_are_non_decreasing_and_capped() {
        let mut backoff = Backoff::default();
        let mut previous = Duration::ZERO;
        for _ in 0..64 {
            let delay = backoff.next_attempt();
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(30));
            previous = delay;
        }
        assert_eq!(backoff.retry_count(), 64);
    }

    #[test]
    fn reset_returns_to_initial_delay() {
        let mut backoff = Backoff::default();
        backoff.next_attempt();
        backoff.next_attempt();
        backoff.next_attempt();
        assert_eq!(backoff.current_delay(), Duration::from_secs(8));

        backoff.reset();
        assert_eq!(backoff.retry_count(), 0);
        assert_eq!(backoff.next_attempt(), Duration::from_secs(1));
    }
}
