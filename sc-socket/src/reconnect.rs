//! Reconnection policy.
//!
//! Decides whether and after how long to retry after a connection drops.
//! Delays grow exponentially with jitter (1s, 2s, 4s, ... capped at
//! `max_delay`) and never shrink until a connection succeeds.

use std::time::Duration;

use tracing::debug;

use sc_core::config::SocketConfig;

use crate::error::SocketError;

/// Pluggable reconnection policy.
pub trait ReconnectionStrategy: Send {
    /// Delay before the next attempt, or `None` to stop retrying.
    ///
    /// Every call counts as one consecutive failure.
    fn reconnection_delay(&mut self, error: Option<&SocketError>) -> Option<Duration>;

    /// Reset the failure count after a successful connection.
    fn successfully_connected(&mut self);
}

/// Configuration for socket reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Base delay between reconnection attempts.
    pub base_delay: Duration,
    /// Maximum delay cap for exponential backoff.
    pub max_delay: Duration,
    /// Maximum number of reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
    /// Fraction (0.0 to 1.0) of each delay that may be shaved off at random.
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&SocketConfig::default())
    }
}

impl From<&SocketConfig> for ReconnectConfig {
    fn from(config: &SocketConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
            max_attempts: config.reconnect_max_attempts,
            jitter_factor: config.reconnect_jitter,
        }
    }
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct DefaultReconnectionStrategy {
    config: ReconnectConfig,
    consecutive_failures: u32,
    last_delay: Duration,
}

impl DefaultReconnectionStrategy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
            last_delay: Duration::ZERO,
        }
    }

    /// Failures since the last successful connection.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn next_delay(&self) -> Duration {
        let base = self.config.base_delay.as_secs_f64();
        let max = self.config.max_delay.as_secs_f64();

        // Exponential backoff: base * 2^attempt
        let exponent = self.consecutive_failures.min(31) as i32;
        let exponential = (base * 2.0_f64.powi(exponent)).min(max);

        let jitter = rand::random::<f64>() * self.config.jitter_factor.clamp(0.0, 1.0);
        let delay = Duration::from_secs_f64(exponential * (1.0 - jitter));

        delay.max(self.last_delay).min(self.config.max_delay)
    }
}

impl Default for DefaultReconnectionStrategy {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

impl ReconnectionStrategy for DefaultReconnectionStrategy {
    fn reconnection_delay(&mut self, error: Option<&SocketError>) -> Option<Duration> {
        if let Some(error) = error {
            if error.is_normal_closure() {
                debug!("not reconnecting after normal closure");
                return None;
            }
            if error.is_invalid_token() {
                debug!("not reconnecting with an invalid token");
                return None;
            }
        }

        if self.config.max_attempts > 0 && self.consecutive_failures >= self.config.max_attempts {
            debug!(
                "max reconnection attempts ({}) reached",
                self.config.max_attempts
            );
            return None;
        }

        let delay = self.next_delay();
        self.consecutive_failures += 1;
        self.last_delay = delay;
        Some(delay)
    }

    fn successfully_connected(&mut self) {
        self.consecutive_failures = 0;
        self.last_delay = Duration::ZERO;
    }
}
