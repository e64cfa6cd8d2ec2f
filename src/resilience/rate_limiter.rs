//! Sliding-window admission control
//!
//! One limiter guards one service. Two trailing windows are enforced over a
//! single timestamp log: at most N admissions in any 1-second window and at
//! most M in any 60-second window. Capacity pressure delays the caller
//! until the oldest relevant timestamp ages out; it never rejects. The
//! internal lock covers only the check-and-record step, never a sleep.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ConfigError;

const SECOND_WINDOW: Duration = Duration::from_secs(1);
const MINUTE_WINDOW: Duration = Duration::from_secs(60);

// Nudge past the window boundary so a re-check after sleeping admits
// instead of computing a zero wait again.
const WAIT_NUDGE: Duration = Duration::from_millis(1);

/// The caller's deadline expired while waiting for admission
#[derive(Debug, Error)]
#[error("deadline expired while waiting for rate limiter admission")]
pub struct AdmissionTimeout;

/// Dual sliding-window rate limiter
///
/// Admissions are recorded as instants in a deque ordered oldest-first;
/// entries older than the minute window are pruned on every check.
pub struct SlidingWindowLimiter<C: Clock = SystemClock> {
    per_second: u32,
    per_minute: u32,
    window: Mutex<VecDeque<Instant>>,
    clock: Arc<C>,
}

impl<C: Clock> std::fmt::Debug for SlidingWindowLimiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("per_second", &self.per_second)
            .field("per_minute", &self.per_minute)
            .finish()
    }
}

impl SlidingWindowLimiter<SystemClock> {
    pub fn new(per_second: u32, per_minute: u32) -> Result<Self, ConfigError> {
        Self::with_clock(per_second, per_minute, SystemClock)
    }
}

impl<C: Clock> SlidingWindowLimiter<C> {
    /// Create a limiter with a custom clock (useful for testing)
    pub fn with_clock(per_second: u32, per_minute: u32, clock: C) -> Result<Self, ConfigError> {
        if per_second == 0 {
            return Err(ConfigError::invalid("per-second limit must be greater than 0"));
        }
        if per_minute == 0 {
            return Err(ConfigError::invalid("per-minute limit must be greater than 0"));
        }
        if per_second > per_minute {
            return Err(ConfigError::invalid("per-second limit must not exceed per-minute limit"));
        }

        Ok(Self {
            per_second,
            per_minute,
            window: Mutex::new(VecDeque::with_capacity(per_minute as usize)),
            clock: Arc::new(clock),
        })
    }

    /// Try to admit one call right now
    ///
    /// On success the admission is recorded under the same lock as the
    /// check. On `Err`, the returned duration is how long the caller must
    /// wait before the oldest blocking timestamp ages out of its window.
    pub fn try_admit(&self) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut window = match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("rate limiter window lock poisoned");
                poisoned.into_inner()
            }
        };

        while let Some(front) = window.front() {
            if now.duration_since(*front) >= MINUTE_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }

        let minute_count = window.len() as u32;
        let second_count =
            window.iter().rev().take_while(|ts| now.duration_since(**ts) < SECOND_WINDOW).count()
                as u32;

        let mut wait = Duration::ZERO;
        if second_count >= self.per_second {
            // Oldest entry still inside the one-second window
            let idx = window.len() - second_count as usize;
            if let Some(ts) = window.get(idx) {
                wait = wait.max((*ts + SECOND_WINDOW).saturating_duration_since(now));
            }
        }
        if minute_count >= self.per_minute {
            if let Some(front) = window.front() {
                wait = wait.max((*front + MINUTE_WINDOW).saturating_duration_since(now));
            }
        }

        if wait.is_zero() && second_count < self.per_second && minute_count < self.per_minute {
            window.push_back(now);
            Ok(())
        } else {
            Err(wait + WAIT_NUDGE)
        }
    }

    /// Wait for admission, sleeping and re-checking until a slot frees
    ///
    /// A deadline, when given, bounds the wait: if the next required sleep
    /// would overrun it, the call aborts without recording anything.
    pub async fn admit(&self, deadline: Option<Instant>) -> Result<(), AdmissionTimeout> {
        loop {
            match self.try_admit() {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    if let Some(deadline) = deadline {
                        if self.clock.now() + wait > deadline {
                            debug!(
                                wait_ms = wait.as_millis() as u64,
                                "admission wait would overrun deadline"
                            );
                            return Err(AdmissionTimeout);
                        }
                    }
                    debug!(wait_ms = wait.as_millis() as u64, "delaying admission");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Current admissions inside the (second, minute) windows
    pub fn window_counts(&self) -> (u32, u32) {
        let now = self.clock.now();
        let window = match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("rate limiter window lock poisoned");
                poisoned.into_inner()
            }
        };

        let minute = window.iter().filter(|ts| now.duration_since(**ts) < MINUTE_WINDOW).count();
        let second =
            window.iter().rev().take_while(|ts| now.duration_since(**ts) < SECOND_WINDOW).count();
        (second as u32, minute as u32)
    }

    pub fn per_second(&self) -> u32 {
        self.per_second
    }

    pub fn per_minute(&self) -> u32 {
        self.per_minute
    }
}
