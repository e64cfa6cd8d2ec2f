//! Error taxonomy surfaced by guarded invocations
//!
//! Every failure leaving this crate is tagged: callers can match on the
//! variant (and the category inside `Failed`) without parsing messages.

use std::time::Duration;

use thiserror::Error;

use crate::classify::{ErrorCategory, ProviderError};
use crate::config::ConfigError;
use crate::validation::ValidationError;

/// Result alias for guarded invocations
pub type InvokeResult<T> = Result<T, InvokeError>;

/// Failure of a guarded invocation or of handle construction
#[derive(Debug, Error)]
pub enum InvokeError {
    /// Handle construction failed credential validation; fatal until the
    /// configuration changes
    #[error("configuration for service '{service}' is invalid: {source}")]
    Configuration {
        service: String,
        #[source]
        source: ValidationError,
    },

    /// Handle construction failed because the resilience limits are
    /// internally inconsistent
    #[error("limits for service '{service}' are invalid: {source}")]
    Limits {
        service: String,
        #[source]
        source: ConfigError,
    },

    /// No blueprint registered under this service id
    #[error("service '{service}' is not registered")]
    UnknownService { service: String },

    /// Circuit is open; the provider was not contacted
    #[error("circuit open for service '{service}', retry after {retry_after:?}")]
    CircuitOpen { service: String, retry_after: Option<Duration> },

    /// The caller's deadline expired while waiting for admission or backoff
    #[error("deadline exceeded for '{service}/{operation}' after {elapsed:?}")]
    DeadlineExceeded { service: String, operation: String, elapsed: Duration },

    /// Terminal classified failure after all permitted attempts
    #[error("'{service}/{operation}' failed as {category} after {attempts} attempt(s): {source}")]
    Failed {
        service: String,
        operation: String,
        category: ErrorCategory,
        attempts: u32,
        #[source]
        source: ProviderError,
    },
}

impl InvokeError {
    pub fn configuration(service: impl Into<String>, source: ValidationError) -> Self {
        Self::Configuration { service: service.into(), source }
    }

    pub fn unknown_service(service: impl Into<String>) -> Self {
        Self::UnknownService { service: service.into() }
    }

    /// The failure category, when this error represents a classified
    /// provider failure
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Failed { category, .. } => Some(*category),
            _ => None,
        }
    }

    /// Whether waiting and re-invoking could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } | Self::DeadlineExceeded { .. } => true,
            Self::Failed { category, .. } => category.is_retryable(),
            Self::Configuration { .. } | Self::Limits { .. } | Self::UnknownService { .. } => false,
        }
    }
}
