//! Backoff with jitter for relay error recovery

use rand::Rng;
use std::time::Duration;

/// Backoff configuration for a relay loop
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
    /// Fraction of the backoff added or removed at random (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(120),
            backoff_multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Backoff for `attempt` spread by up to `jitter` in either direction so
    /// oracles that failed together do not retry in lockstep.
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff_for_attempt(attempt).as_secs_f64();
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base == 0.0 {
            return Duration::from_secs_f64(base);
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        Duration::from_secs_f64(base * factor)
    }
}
