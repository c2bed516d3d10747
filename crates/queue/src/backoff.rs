//! Capped exponential back-off for queue read failures.

use std::time::Duration;

/// Exponential back-off with a ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Ceiling that no delay exceeds.
    pub max_delay: Duration,
    /// Multiplier for exponential growth.
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1000),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Delay to wait after `attempt` consecutive failures (0-indexed).
    ///
    /// Non-decreasing in `attempt` and saturates at `max_delay` instead of
    /// overflowing, however large `attempt` gets.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        match Duration::try_from_secs_f64(delay_secs) {
            Ok(delay) if delay < self.max_delay => delay,
            _ => self.max_delay,
        }
    }
}
