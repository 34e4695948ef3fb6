//! Reconnection logic with exponential backoff

use std::time::Duration;
use tracing::debug;

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after the first failure, and after every successful authentication
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Backoff state owned by the reconnect loop
///
/// There is no attempt limit: the tunnel retries until the process is stopped.
#[derive(Debug)]
pub struct ReconnectManager {
    config: ReconnectConfig,
    current_backoff: Duration,
    attempt: usize,
}

impl ReconnectManager {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            current_backoff: config.initial_backoff,
            config,
            attempt: 0,
        }
    }

    /// Delay to wait before the next attempt; grows the backoff for the one after
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let delay = self.current_backoff;

        // Cap in f64 first: a huge multiplier must not overflow Duration
        let max = self.config.max_backoff;
        let grown = (self.current_backoff.as_secs_f64() * self.config.multiplier)
            .min(max.as_secs_f64());
        self.current_backoff = Duration::try_from_secs_f64(grown).map_or(max, |d| d.min(max));

        debug!(
            "Reconnect attempt {} in {:?} (next backoff {:?})",
            self.attempt, delay, self.current_backoff
        );

        delay
    }

    /// Reset backoff (call after successful authentication)
    pub fn reset(&mut self) {
        debug!("Resetting reconnection backoff");
        self.current_backoff = self.config.initial_backoff;
        self.attempt = 0;
    }

    /// Consecutive failures since the last reset
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Delay the next failure will wait
    pub fn current_backoff(&self) -> Duration {
        self.current_backoff
    }
}
