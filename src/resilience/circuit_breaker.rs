//! Circuit breaker for sustained provider outages
//!
//! One breaker guards one service. Consecutive failures across all callers
//! open the circuit; while open, calls are rejected without touching the
//! provider. After the cool-down a single trial call tests recovery: its
//! success closes the circuit, its failure re-opens it for another full
//! cool-down. The trial slot is claimed by an atomic compare-and-set
//! through a [`CallPermit`]; a permit dropped without a recorded outcome
//! (deadline abort, cancelled future) releases the slot so the breaker can
//! never wedge in half-open.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ConfigError;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected until the cool-down elapses
    Open,
    /// One trial call is probing recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Per-service circuit breaker
///
/// Cloning is cheap and shares state: clones observe and drive the same
/// circuit.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    failure_threshold: u32,
    open_duration: Duration,
    inner: Arc<Mutex<BreakerInner>>,
    trial_in_flight: Arc<AtomicBool>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("failure_threshold", &self.failure_threshold)
            .field("open_duration", &self.open_duration)
            .field("state", &self.state())
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            failure_threshold: self.failure_threshold,
            open_duration: self.open_duration,
            inner: Arc::clone(&self.inner),
            trial_in_flight: Arc::clone(&self.trial_in_flight),
            clock: Arc::clone(&self.clock),
        }
    }
}

/// Admission ticket for one guarded call
///
/// Obtained from [`CircuitBreaker::try_acquire`]. Resolve it with
/// [`CallPermit::record_success`] or [`CallPermit::record_failure`]; a
/// permit dropped unresolved releases a held trial slot without recording
/// an outcome, keeping aborted trial calls state-neutral. Outcomes for a
/// trial call must go through its permit, not the breaker directly.
#[must_use = "a permit must be resolved or dropped to release the trial slot"]
pub struct CallPermit<C: Clock = SystemClock> {
    breaker: CircuitBreaker<C>,
    trial: bool,
    resolved: bool,
}

impl<C: Clock> fmt::Debug for CallPermit<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit").field("trial", &self.trial).finish()
    }
}

impl<C: Clock> CallPermit<C> {
    /// Whether this permit holds the half-open trial slot
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Record the guarded call as successful
    pub fn record_success(mut self) {
        self.resolved = true;
        self.breaker.record_success();
    }

    /// Record the guarded call as failed
    pub fn record_failure(mut self) {
        self.resolved = true;
        self.breaker.record_failure();
    }
}

impl<C: Clock> Drop for CallPermit<C> {
    fn drop(&mut self) {
        if self.trial && !self.resolved {
            debug!("trial permit dropped without outcome, releasing slot");
            self.breaker.trial_in_flight.store(false, Ordering::Release);
        }
    }
}

impl CircuitBreaker<SystemClock> {
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Result<Self, ConfigError> {
        Self::with_clock(failure_threshold, open_duration, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (useful for testing)
    pub fn with_clock(
        failure_threshold: u32,
        open_duration: Duration,
        clock: C,
    ) -> Result<Self, ConfigError> {
        if failure_threshold == 0 {
            return Err(ConfigError::invalid("failure threshold must be greater than 0"));
        }
        if open_duration.is_zero() {
            return Err(ConfigError::invalid("open duration must be greater than 0"));
        }

        Ok(Self {
            failure_threshold,
            open_duration,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            })),
            trial_in_flight: Arc::new(AtomicBool::new(false)),
            clock: Arc::new(clock),
        })
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("circuit breaker lock poisoned");
                poisoned.into_inner()
            }
        }
    }

    /// Try to admit one call
    ///
    /// Transitions open to half-open once the cool-down has elapsed. In the
    /// half-open state exactly one caller wins the trial slot; everyone
    /// else gets `None` until that permit resolves or drops.
    pub fn try_acquire(&self) -> Option<CallPermit<C>> {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::Closed => Some(self.permit(false)),
            CircuitState::Open => {
                let cooled_down = match inner.opened_at {
                    Some(opened_at) => {
                        self.clock.now().duration_since(opened_at) >= self.open_duration
                    }
                    None => true,
                };
                if !cooled_down {
                    return None;
                }

                inner.state = CircuitState::HalfOpen;
                info!("circuit transitioning to half-open after cool-down");
                self.claim_trial()
            }
            CircuitState::HalfOpen => self.claim_trial(),
        }
    }

    fn permit(&self, trial: bool) -> CallPermit<C> {
        CallPermit { breaker: self.clone(), trial, resolved: false }
    }

    fn claim_trial(&self) -> Option<CallPermit<C>> {
        self.trial_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then(|| self.permit(true))
    }

    /// Record a successful call outcome
    pub fn record_success(&self) {
        let mut inner = self.lock_inner();

        if inner.state != CircuitState::Closed {
            info!(state = %inner.state, "circuit closing after successful call");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        self.trial_in_flight.store(false, Ordering::Release);
    }

    /// Record a failed call outcome
    pub fn record_failure(&self) {
        let mut inner = self.lock_inner();
        inner.consecutive_failures += 1;

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(self.clock.now());
                    warn!(
                        failures = inner.consecutive_failures,
                        "circuit opened after consecutive failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(self.clock.now());
                warn!("circuit re-opened: trial call failed");
            }
            CircuitState::Open => {
                // Late result from a call admitted before opening; the
                // cool-down window is not extended
            }
        }
        self.trial_in_flight.store(false, Ordering::Release);
    }

    /// Current state (without transitioning)
    pub fn state(&self) -> CircuitState {
        self.lock_inner().state
    }

    /// Remaining cool-down when the circuit is open
    pub fn retry_after(&self) -> Option<Duration> {
        let inner = self.lock_inner();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                self.open_duration
                    .saturating_sub(self.clock.now().duration_since(opened_at)),
            ),
            _ => None,
        }
    }

    /// Consecutive failures observed since the last success
    pub fn consecutive_failures(&self) -> u32 {
        self.lock_inner().consecutive_failures
    }
}
