//! Per-service client handles and the guarded invocation loop
//!
//! A [`ServiceHandle`] bundles everything one external service needs: its
//! validated credentials, a rate limiter, a circuit breaker, a backoff
//! schedule, a failure classifier, and a credential refresher. The
//! [`ServiceHandle::invoke`] loop drives a call through all of them,
//! expressing each retry decision as an explicit [`Transition`] value.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, instrument, warn};

use crate::classify::{Classifier, ErrorCategory, ProviderError};
use crate::config::Limits;
use crate::credentials::{CredentialRefresher, CredentialStore, NoRefresh};
use crate::error::{InvokeError, InvokeResult};
use crate::resilience::{BackoffPolicy, CircuitBreaker, CircuitState, SlidingWindowLimiter};
use crate::validation::EnvRequirements;

/// Blueprint for constructing a [`ServiceHandle`]
///
/// Registered with the registry once per service; the handle itself is
/// built lazily on first use so a bad configuration can be corrected and
/// retried without restarting the process.
#[derive(Clone)]
pub struct ServiceSpec {
    service: String,
    limits: Limits,
    requirements: EnvRequirements,
    credentials: HashMap<String, String>,
    classifier: Classifier,
    refresher: Arc<dyn CredentialRefresher>,
    rng_seed: Option<u64>,
}

impl fmt::Debug for ServiceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSpec")
            .field("service", &self.service)
            .field("limits", &self.limits)
            .field("required_keys", &self.requirements.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceSpec {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            limits: Limits::default(),
            requirements: EnvRequirements::new(),
            credentials: HashMap::new(),
            classifier: Classifier::new(),
            refresher: Arc::new(NoRefresh),
            rng_seed: None,
        }
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn requirements(mut self, requirements: EnvRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Add one credential value
    pub fn credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(key.into(), value.into());
        self
    }

    /// Replace the whole credential map
    pub fn credentials(mut self, credentials: HashMap<String, String>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Load credentials for the required keys from the process environment
    pub fn credentials_from_env(mut self) -> Self {
        self.credentials = self.requirements.from_process_env();
        self
    }

    pub fn classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn refresher(mut self, refresher: Arc<dyn CredentialRefresher>) -> Self {
        self.refresher = refresher;
        self
    }

    /// Fix the jitter RNG seed for reproducible backoff schedules
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Construct a handle, running credential validation
    pub fn build(&self) -> InvokeResult<ServiceHandle> {
        ServiceHandle::from_spec(self)
    }
}

/// Outcome of one failed attempt, driving the invocation loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    /// Retry immediately without a backoff delay (post-refresh)
    RetryNow,
    /// Retry after a backoff delay
    Retry { delay: Duration },
    /// Stop and surface the failure under this category
    Fail { category: ErrorCategory },
}

/// Shared per-service client state
///
/// One handle exists per service id in a registry; all tasks calling the
/// same provider share its limiter, breaker, and credential store through
/// `Arc`.
pub struct ServiceHandle {
    service: String,
    limits: Limits,
    credentials: Arc<CredentialStore>,
    limiter: SlidingWindowLimiter,
    breaker: CircuitBreaker,
    backoff: BackoffPolicy,
    classifier: Classifier,
    refresher: Arc<dyn CredentialRefresher>,
    rng: Mutex<StdRng>,
    created_at: Instant,
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("service", &self.service)
            .field("limits", &self.limits)
            .field("breaker_state", &self.breaker.state())
            .finish()
    }
}

impl ServiceHandle {
    fn from_spec(spec: &ServiceSpec) -> InvokeResult<Self> {
        if let Err(source) = spec.requirements.validate(&spec.credentials) {
            return Err(InvokeError::configuration(&spec.service, source));
        }

        let limits = spec.limits.clone();
        let wrap = |source| InvokeError::Limits { service: spec.service.clone(), source };

        let limiter =
            SlidingWindowLimiter::new(limits.max_requests_per_second, limits.max_requests_per_minute)
                .map_err(wrap)?;
        let breaker =
            CircuitBreaker::new(limits.circuit_failure_threshold, limits.circuit_open_duration)
                .map_err(wrap)?;
        let backoff = BackoffPolicy::new(limits.backoff_base_delay, limits.backoff_max_delay)
            .map_err(wrap)?;

        let rng = match spec.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            service: spec.service.clone(),
            limits,
            credentials: Arc::new(CredentialStore::new(spec.credentials.clone())),
            limiter,
            breaker,
            backoff,
            classifier: spec.classifier.clone(),
            refresher: Arc::clone(&spec.refresher),
            rng: Mutex::new(rng),
            created_at: Instant::now(),
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// The current value of a credential key
    ///
    /// Reads through the live store, so a value replaced by a refresher is
    /// visible here immediately.
    pub fn credential(&self, key: &str) -> Option<String> {
        self.credentials.get(key)
    }

    /// The handle's live credential store
    pub fn credential_store(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Current admissions inside the (second, minute) rate windows
    pub fn window_counts(&self) -> (u32, u32) {
        self.limiter.window_counts()
    }

    /// Execute one provider call under full protection
    ///
    /// Order per attempt: circuit breaker gate, rate limiter admission,
    /// then the call itself. Failures are classified and drive an explicit
    /// transition: immediate retry after a credential refresh, delayed
    /// retry for transient categories, or a terminal classified error.
    /// The deadline bounds admission and backoff waits; expiry surfaces as
    /// [`InvokeError::DeadlineExceeded`] without mutating breaker state —
    /// an abort between breaker gate and call drops the permit, which
    /// returns a held half-open trial slot to the breaker.
    #[instrument(skip(self, op), fields(service = %self.service))]
    pub async fn invoke<T, F, Fut>(
        &self,
        operation: &str,
        deadline: Duration,
        mut op: F,
    ) -> InvokeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let started = Instant::now();
        let deadline_at = started + deadline;
        let mut attempt: u32 = 0;
        let mut calls_made: u32 = 0;
        let mut credential_retry_used = false;

        loop {
            let Some(permit) = self.breaker.try_acquire() else {
                debug!("rejecting call: circuit open");
                return Err(InvokeError::CircuitOpen {
                    service: self.service.clone(),
                    retry_after: self.breaker.retry_after(),
                });
            };

            if self.limiter.admit(Some(deadline_at)).await.is_err() {
                // Dropping the unresolved permit releases a trial slot
                drop(permit);
                return Err(self.deadline_exceeded(operation, started));
            }

            calls_made += 1;
            let error = match op().await {
                Ok(value) => {
                    permit.record_success();
                    debug!(calls_made, "call succeeded");
                    return Ok(value);
                }
                Err(error) => error,
            };

            let category = self.classifier.classify(&error);
            permit.record_failure();
            warn!(%category, calls_made, error = %error, "call failed");

            let transition = match category {
                ErrorCategory::Auth if !credential_retry_used => {
                    if self.refresher.refresh(&self.credentials).await {
                        credential_retry_used = true;
                        Transition::RetryNow
                    } else {
                        // A refresh that cannot produce working credentials
                        // leaves nothing worth retrying
                        Transition::Fail { category: ErrorCategory::NonRetryable }
                    }
                }
                ErrorCategory::RateLimited | ErrorCategory::TransientServer
                    if attempt < self.limits.max_retries =>
                {
                    let delay = {
                        let mut rng = match self.rng.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        self.backoff.delay_for(attempt, &mut *rng)
                    };
                    Transition::Retry { delay }
                }
                _ => Transition::Fail { category },
            };

            match transition {
                Transition::RetryNow => {
                    debug!("retrying immediately after credential refresh");
                }
                Transition::Retry { delay } => {
                    if Instant::now() + delay > deadline_at {
                        return Err(self.deadline_exceeded(operation, started));
                    }
                    debug!(delay_ms = delay.as_millis() as u64, attempt, "backing off before retry");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Transition::Fail { category } => {
                    return Err(InvokeError::Failed {
                        service: self.service.clone(),
                        operation: operation.to_string(),
                        category,
                        attempts: calls_made,
                        source: error,
                    });
                }
            }
        }
    }

    fn deadline_exceeded(&self, operation: &str, started: Instant) -> InvokeError {
        InvokeError::DeadlineExceeded {
            service: self.service.clone(),
            operation: operation.to_string(),
            elapsed: started.elapsed(),
        }
    }
}
