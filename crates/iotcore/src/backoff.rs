//! Reconnect delays for the connection kernel.
//!
//! Delays grow geometrically from `initial` by `multiplier` and plateau at
//! `max`:
//!
//! ```text
//! delay[n] = min(initial * multiplier^(n-1), max)
//! ```
//!
//! A device is expected to stay online indefinitely, so attempts are unlimited
//! unless a limit is set explicitly. Every new attempt also re-mints the device
//! token when the credential strategy requires it, so a gentle schedule keeps
//! signing load low during long outages.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackoffError {
    /// The configured number of reconnect attempts has been used up.
    #[error("Gave up after {0} reconnect attempts")]
    AttemptsExhausted(u32),
}

/// Geometric backoff with an optional attempt limit.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    next: Duration,
    attempt: u32,
    limit: Option<u32>,
}

impl Backoff {
    /// A multiplier below 1.0 is treated as 1.0 (constant delay). `initial`
    /// above `max` is clamped to `max`.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            multiplier: multiplier.max(1.0),
            next: initial,
            attempt: 0,
            limit: None,
        }
    }

    /// Limits the number of consecutive failed attempts. Zero means unlimited.
    pub fn with_max_attempts(mut self, limit: u32) -> Self {
        self.limit = (limit > 0).then_some(limit);
        self
    }

    /// Call after a successful connection.
    pub fn reset(&mut self) {
        self.next = self.initial;
        self.attempt = 0;
    }

    /// Returns the delay before the next attempt and advances the schedule.
    pub fn next_delay(&mut self) -> Result<Duration, BackoffError> {
        if let Some(limit) = self.limit {
            if self.attempt >= limit {
                return Err(BackoffError::AttemptsExhausted(limit));
            }
        }
        self.attempt += 1;

        let delay = self.next;
        let grown = self.next.as_secs_f64() * self.multiplier;
        self.next = if grown >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(grown)
        };
        Ok(delay)
    }

    /// Failed attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.limit
    }
}

impl Default for Backoff {
    /// 1 s doubling up to 2 minutes, unlimited attempts.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(120), 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..9)
            .map(|_| backoff.next_delay().unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 64, 120, 120]);
    }

    #[test]
    fn test_unlimited_by_default() {
        let mut backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(2), 2.0);
        for _ in 0..1000 {
            assert!(backoff.next_delay().is_ok());
        }
        assert_eq!(backoff.attempt(), 1000);
        assert_eq!(backoff.max_attempts(), None);
    }

    #[test]
    fn test_attempt_limit() {
        let mut backoff = Backoff::default().with_max_attempts(2);

        assert!(backoff.next_delay().is_ok());
        assert!(backoff.next_delay().is_ok());
        assert_eq!(
            backoff.next_delay(),
            Err(BackoffError::AttemptsExhausted(2))
        );
    }

    #[test]
    fn test_zero_limit_is_unlimited() {
        let backoff = Backoff::default().with_max_attempts(0);
        assert_eq!(backoff.max_attempts(), None);
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::default().with_max_attempts(3);
        backoff.next_delay().unwrap();
        backoff.next_delay().unwrap();
        backoff.next_delay().unwrap();

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn test_degenerate_parameters() {
        let mut constant = Backoff::new(Duration::from_secs(5), Duration::from_secs(60), 0.5);
        assert_eq!(constant.next_delay().unwrap(), Duration::from_secs(5));
        assert_eq!(constant.next_delay().unwrap(), Duration::from_secs(5));

        let mut clamped = Backoff::new(Duration::from_secs(90), Duration::from_secs(30), 2.0);
        assert_eq!(clamped.next_delay().unwrap(), Duration::from_secs(30));
    }
}
