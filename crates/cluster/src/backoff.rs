//! Exponential backoff for loops that retry a failing remote call.
//!
//! The result listener backs off between failed queue reads and the
//! finalizer between failed output writes. Both use a [`Backoff`] built
//! from a [`BackoffConfig`] and reset it after a success.

use std::time::Duration;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
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

/// Running backoff state for one retry loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial_delay;
        Self { config, current }
    }

    /// Delay to wait before the next attempt. Grows the delay for the one
    /// after, never past [`BackoffConfig::max_delay`].
    pub fn next_wait(&mut self) -> Duration {
        let wait = self.current;
        let grown = self.current.as_secs_f64() * self.config.multiplier;
        self.current = Duration::try_from_secs_f64(grown)
            .map_or(self.config.max_delay, |next| next.min(self.config.max_delay));
        wait
    }

    /// Start over from the initial delay.
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
