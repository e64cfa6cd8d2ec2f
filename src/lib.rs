//! # guardpost
//!
//! Resilient API client core for services calling quota-limited third-party
//! HTTP APIs from many concurrent tasks.
//!
//! Each external service gets exactly one [`ServiceHandle`] per
//! [`ServiceRegistry`], holding its validated credentials and the three
//! protection mechanisms every outbound call passes through:
//!
//! 1. a [`CircuitBreaker`](resilience::CircuitBreaker) that fails fast
//!    during sustained outages,
//! 2. a [`SlidingWindowLimiter`](resilience::SlidingWindowLimiter) that
//!    delays calls to stay under per-second and per-minute quotas,
//! 3. classified retries with capped, jittered exponential backoff, plus a
//!    one-shot credential refresh on auth failures.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use guardpost::{
//!     EnvRequirements, Limits, ProviderError, ServiceRegistry, ServiceSpec,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ServiceRegistry::new();
//! registry.register(
//!     ServiceSpec::new("scheduling")
//!         .limits(Limits::from_env()?)
//!         .requirements(EnvRequirements::new().require("CALENDAR_API_KEY"))
//!         .credentials_from_env(),
//! );
//!
//! let booked = registry
//!     .invoke("scheduling", "create_event", Duration::from_secs(10), || async {
//!         // issue the HTTP request here
//!         Ok::<_, ProviderError>("event-id")
//!     })
//!     .await?;
//! # let _ = booked;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod classify;
pub mod client;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod registry;
pub mod resilience;
pub mod validation;

// Core invocation surface
pub use classify::{Classifier, ErrorCategory, ProviderError};
pub use client::{ServiceHandle, ServiceSpec};
pub use error::{InvokeError, InvokeResult};
pub use registry::ServiceRegistry;

// Configuration and validation
pub use config::{ConfigError, Limits, LimitsBuilder};
pub use validation::{EnvRequirements, FieldError, KeyConstraint, ValidationError};

// Credential refresh seam
pub use credentials::{CredentialRefresher, CredentialStore, EnvRefresher, NoRefresh};

// Resilience primitives and test clock
pub use clock::{Clock, MockClock, SystemClock};
pub use resilience::{BackoffPolicy, CallPermit, CircuitBreaker, CircuitState, SlidingWindowLimiter};
