//! Resilience limits and their environment surface
//!
//! All knobs ship with conservative defaults and can be overridden per
//! deployment through environment variables. Duration-valued variables are
//! integer milliseconds.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

/// Configuration validation error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    Invalid { message: String },

    #[error("environment variable {name} is malformed: {message}")]
    Env { name: String, message: String },
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }

    pub fn env(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Env { name: name.into(), message: message.into() }
    }
}

/// Environment variable names for the limit knobs
pub mod env_keys {
    pub const MAX_REQUESTS_PER_SECOND: &str = "MAX_REQUESTS_PER_SECOND";
    pub const MAX_REQUESTS_PER_MINUTE: &str = "MAX_REQUESTS_PER_MINUTE";
    pub const MAX_RETRIES: &str = "MAX_RETRIES";
    pub const BACKOFF_BASE_DELAY: &str = "BACKOFF_BASE_DELAY";
    pub const BACKOFF_MAX_DELAY: &str = "BACKOFF_MAX_DELAY";
    pub const CIRCUIT_FAILURE_THRESHOLD: &str = "CIRCUIT_FAILURE_THRESHOLD";
    pub const CIRCUIT_OPEN_DURATION: &str = "CIRCUIT_OPEN_DURATION";
}

/// Per-service resilience limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Calls admitted in any trailing one-second window
    pub max_requests_per_second: u32,
    /// Calls admitted in any trailing sixty-second window
    pub max_requests_per_minute: u32,
    /// Backoff retries after the initial attempt (credential refresh retry
    /// does not count against this)
    pub max_retries: u32,
    /// First backoff delay; doubles each retry
    pub backoff_base_delay: Duration,
    /// Ceiling for the un-jittered backoff delay
    pub backoff_max_delay: Duration,
    /// Consecutive failures that open the circuit
    pub circuit_failure_threshold: u32,
    /// How long an open circuit rejects calls before probing
    pub circuit_open_duration: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_requests_per_second: 5,
            max_requests_per_minute: 100,
            max_retries: 3,
            backoff_base_delay: Duration::from_millis(500),
            backoff_max_delay: Duration::from_secs(30),
            circuit_failure_threshold: 5,
            circuit_open_duration: Duration::from_secs(60),
        }
    }
}

impl Limits {
    pub fn builder() -> LimitsBuilder {
        LimitsBuilder::new()
    }

    /// Validate internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests_per_second == 0 {
            return Err(ConfigError::invalid("max_requests_per_second must be greater than 0"));
        }
        if self.max_requests_per_minute == 0 {
            return Err(ConfigError::invalid("max_requests_per_minute must be greater than 0"));
        }
        if self.max_requests_per_second > self.max_requests_per_minute {
            return Err(ConfigError::invalid(
                "max_requests_per_second must not exceed max_requests_per_minute",
            ));
        }
        if self.backoff_base_delay.is_zero() {
            return Err(ConfigError::invalid("backoff_base_delay must be greater than 0"));
        }
        if self.backoff_base_delay > self.backoff_max_delay {
            return Err(ConfigError::invalid("backoff_base_delay must not exceed backoff_max_delay"));
        }
        if self.circuit_failure_threshold == 0 {
            return Err(ConfigError::invalid("circuit_failure_threshold must be greater than 0"));
        }
        if self.circuit_open_duration.is_zero() {
            return Err(ConfigError::invalid("circuit_open_duration must be greater than 0"));
        }
        Ok(())
    }

    /// Build limits from the process environment
    ///
    /// Unset variables keep their defaults; set-but-malformed variables are
    /// an error rather than silently ignored.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars = [
            env_keys::MAX_REQUESTS_PER_SECOND,
            env_keys::MAX_REQUESTS_PER_MINUTE,
            env_keys::MAX_RETRIES,
            env_keys::BACKOFF_BASE_DELAY,
            env_keys::BACKOFF_MAX_DELAY,
            env_keys::CIRCUIT_FAILURE_THRESHOLD,
            env_keys::CIRCUIT_OPEN_DURATION,
        ]
        .into_iter()
        .filter_map(|name| std::env::var(name).ok().map(|value| (name.to_string(), value)))
        .collect();

        Self::from_env_map(&vars)
    }

    /// Testable core of [`Limits::from_env`]: same parsing, explicit map
    pub fn from_env_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut limits = Limits::default();

        if let Some(v) = parse_u32(vars, env_keys::MAX_REQUESTS_PER_SECOND)? {
            limits.max_requests_per_second = v;
        }
        if let Some(v) = parse_u32(vars, env_keys::MAX_REQUESTS_PER_MINUTE)? {
            limits.max_requests_per_minute = v;
        }
        if let Some(v) = parse_u32(vars, env_keys::MAX_RETRIES)? {
            limits.max_retries = v;
        }
        if let Some(v) = parse_millis(vars, env_keys::BACKOFF_BASE_DELAY)? {
            limits.backoff_base_delay = v;
        }
        if let Some(v) = parse_millis(vars, env_keys::BACKOFF_MAX_DELAY)? {
            limits.backoff_max_delay = v;
        }
        if let Some(v) = parse_u32(vars, env_keys::CIRCUIT_FAILURE_THRESHOLD)? {
            limits.circuit_failure_threshold = v;
        }
        if let Some(v) = parse_millis(vars, env_keys::CIRCUIT_OPEN_DURATION)? {
            limits.circuit_open_duration = v;
        }

        limits.validate()?;
        Ok(limits)
    }
}

fn parse_u32(vars: &HashMap<String, String>, name: &str) -> Result<Option<u32>, ConfigError> {
    match vars.get(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|e| ConfigError::env(name, format!("expected an unsigned integer: {e}"))),
    }
}

fn parse_millis(vars: &HashMap<String, String>, name: &str) -> Result<Option<Duration>, ConfigError> {
    match vars.get(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| ConfigError::env(name, format!("expected integer milliseconds: {e}"))),
    }
}

/// Builder for [`Limits`]
#[derive(Debug, Default)]
pub struct LimitsBuilder {
    limits: Limits,
}

impl LimitsBuilder {
    pub fn new() -> Self {
        Self { limits: Limits::default() }
    }

    pub fn max_requests_per_second(mut self, n: u32) -> Self {
        self.limits.max_requests_per_second = n;
        self
    }

    pub fn max_requests_per_minute(mut self, n: u32) -> Self {
        self.limits.max_requests_per_minute = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.limits.max_retries = n;
        self
    }

    pub fn backoff_base_delay(mut self, d: Duration) -> Self {
        self.limits.backoff_base_delay = d;
        self
    }

    pub fn backoff_max_delay(mut self, d: Duration) -> Self {
        self.limits.backoff_max_delay = d;
        self
    }

    pub fn circuit_failure_threshold(mut self, n: u32) -> Self {
        self.limits.circuit_failure_threshold = n;
        self
    }

    pub fn circuit_open_duration(mut self, d: Duration) -> Self {
        self.limits.circuit_open_duration = d;
        self
    }

    pub fn build(self) -> Result<Limits, ConfigError> {
        self.limits.validate()?;
        Ok(self.limits)
    }
}
