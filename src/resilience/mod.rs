//! Resilience primitives guarding outbound provider calls
//!
//! Three independent mechanisms compose inside a service handle:
//!
//! - [`SlidingWindowLimiter`] keeps outbound volume under provider quotas
//!   by delaying admissions, never rejecting them.
//! - [`CircuitBreaker`] fails fast during sustained outages and checks
//!   recovery with a single trial call.
//! - [`BackoffPolicy`] spaces retries of transient failures with capped
//!   exponential delays and jitter.

pub mod backoff;
pub mod circuit_breaker;
pub mod rate_limiter;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitState};
pub use rate_limiter::{AdmissionTimeout, SlidingWindowLimiter};
