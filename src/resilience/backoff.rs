//! Capped exponential backoff with jitter
//!
//! Delays double per retry up to a ceiling, then a uniform jitter factor in
//! `[0.5, 1.5)` spreads simultaneous retriers apart. The policy itself is
//! pure; randomness comes from a caller-supplied RNG so schedules are
//! reproducible under a fixed seed.

use std::time::Duration;

use rand::Rng;

use crate::config::ConfigError;

/// Exponential backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Result<Self, ConfigError> {
        if base_delay.is_zero() {
            return Err(ConfigError::invalid("backoff base delay must be greater than 0"));
        }
        if base_delay > max_delay {
            return Err(ConfigError::invalid("backoff base delay must not exceed max delay"));
        }
        Ok(Self { base_delay, max_delay })
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Un-jittered delay for a 0-based attempt index:
    /// `min(base * 2^attempt, max)`
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exp = 2f64.powi(attempt.min(63) as i32);
        Duration::from_millis((base_ms * exp).min(max_ms) as u64)
    }

    /// Jittered delay for a 0-based attempt index
    ///
    /// The raw delay is scaled by a uniform factor in `[0.5, 1.5)`, so the
    /// result is bounded by `[raw / 2, raw * 1.5)`.
    pub fn delay_for<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let raw_ms = self.raw_delay(attempt).as_millis() as f64;
        let factor = rng.gen_range(0.5..1.5);
        Duration::from_millis((raw_ms * factor).round() as u64)
    }
}
