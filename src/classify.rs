//! Failure classification for third-party API calls
//!
//! Every provider failure is reduced to one of five categories that the
//! retry orchestrator understands. Classification is a total function over
//! structured error data: an explicit category hint set by the provider
//! wrapper wins, then a per-provider status override table, then the default
//! HTTP status mapping. Response text is never inspected.

use std::collections::HashMap;
use std::fmt;

/// Closed set of failure categories driving retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Credentials are invalid or expired; a refresh may recover
    Auth,
    /// Authenticated but not allowed; retrying cannot help
    Permission,
    /// Provider quota or throttle hit; retry after backing off
    RateLimited,
    /// Provider-side fault (5xx, connection loss); retry after backing off
    TransientServer,
    /// Anything else; surfaced to the caller immediately
    NonRetryable,
}

impl ErrorCategory {
    /// Whether the retry orchestrator schedules another attempt for this
    /// category (auth is handled by the credential refresh path instead).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::RateLimited | ErrorCategory::TransientServer)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Auth => write!(f, "auth"),
            ErrorCategory::Permission => write!(f, "permission"),
            ErrorCategory::RateLimited => write!(f, "rate_limited"),
            ErrorCategory::TransientServer => write!(f, "transient_server"),
            ErrorCategory::NonRetryable => write!(f, "non_retryable"),
        }
    }
}

/// Structured failure reported by a provider wrapper
///
/// Wrappers construct one of these at the point where the raw response (or
/// transport failure) is still in hand. Anything ambiguous at the HTTP
/// status level, such as a 403 that really means quota exhaustion, must be
/// resolved there via [`ProviderError::with_category`].
#[derive(Debug, Clone)]
pub struct ProviderError {
    service: String,
    status: Option<u16>,
    message: String,
    category_hint: Option<ErrorCategory>,
}

impl std::error::Error for ProviderError {}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{}: HTTP {}: {}", self.service, status, self.message),
            None => write!(f, "{}: {}", self.service, self.message),
        }
    }
}

impl ProviderError {
    /// Failure carrying an HTTP status code
    pub fn http(service: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self { service: service.into(), status: Some(status), message: message.into(), category_hint: None }
    }

    /// Transport-level failure (connection refused, reset, DNS) with no
    /// HTTP status; treated as transient by default
    pub fn network(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            status: None,
            message: message.into(),
            category_hint: Some(ErrorCategory::TransientServer),
        }
    }

    /// Failure with no status and no hint, classified as non-retryable
    pub fn other(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self { service: service.into(), status: None, message: message.into(), category_hint: None }
    }

    /// Attach an explicit category, overriding table-driven classification
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category_hint = Some(category);
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn category_hint(&self) -> Option<ErrorCategory> {
        self.category_hint
    }
}

/// Table-driven classifier mapping provider errors to categories
///
/// The default table implements the common HTTP contract; per-provider
/// quirks are layered on with [`Classifier::with_override`].
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    overrides: HashMap<u16, ErrorCategory>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a specific status code for this provider, shadowing the default
    /// table (e.g. a provider that reports quota exhaustion as 403)
    pub fn with_override(mut self, status: u16, category: ErrorCategory) -> Self {
        self.overrides.insert(status, category);
        self
    }

    /// Classify a provider failure
    ///
    /// Priority: explicit hint on the error, then the override table, then
    /// the default status mapping. Errors without a status and without a
    /// hint are non-retryable.
    pub fn classify(&self, error: &ProviderError) -> ErrorCategory {
        if let Some(hint) = error.category_hint() {
            return hint;
        }

        let Some(status) = error.status() else {
            return ErrorCategory::NonRetryable;
        };

        if let Some(category) = self.overrides.get(&status) {
            return *category;
        }

        match status {
            401 => ErrorCategory::Auth,
            403 => ErrorCategory::Permission,
            429 => ErrorCategory::RateLimited,
            500..=599 => ErrorCategory::TransientServer,
            _ => ErrorCategory::NonRetryable,
        }
    }
}
