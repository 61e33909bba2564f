//! Circuit breaker for fault tolerance.
//!
//! Implements the circuit breaker pattern to stop calling a downstream
//! service that keeps failing:
//!
//! - **Closed**: calls pass. Consecutive failures are counted; reaching the
//!   threshold opens the circuit. A success resets the count.
//! - **Open**: calls are rejected until the recovery timeout has elapsed.
//!   The next call after that becomes the half-open trial.
//! - **HalfOpen**: exactly one trial call is admitted. Its success closes
//!   the circuit, its failure opens it again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use derive_more::Display;
use rampart_core::{Clock, Error, Result, SystemClock};
use tracing::{info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    #[display("closed")]
    Closed,
    /// Circuit is open, requests are rejected immediately.
    #[display("open")]
    Open,
    /// Circuit is half-open, a single trial request is allowed.
    #[display("half-open")]
    HalfOpen,
}

type StateListener = Box<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Circuit breaker guarding outbound calls.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use rampart::CircuitBreaker;
///
/// let breaker = CircuitBreaker::new(3, Duration::from_secs(30)).expect("valid");
/// let permit = breaker.try_acquire().expect("closed circuit admits calls");
/// permit.success();
/// ```
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
    listener: Option<StateListener>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_timeout", &self.recovery_timeout)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a breaker opening after `failure_threshold` consecutive failures
    /// and staying open for `recovery_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if either value is zero.
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Result<Self> {
        Self::with_clock(failure_threshold, recovery_timeout, Arc::new(SystemClock))
    }

    /// Create a breaker reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if either value is zero.
    pub fn with_clock(
        failure_threshold: u32,
        recovery_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if failure_threshold == 0 {
            return Err(Error::config(
                "circuit_breaker_failure_threshold",
                "must be greater than 0",
            ));
        }
        if recovery_timeout.is_zero() {
            return Err(Error::config(
                "circuit_breaker_recovery_timeout",
                "must be greater than 0",
            ));
        }
        Ok(Self {
            failure_threshold,
            recovery_timeout,
            clock,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            listener: None,
        })
    }

    /// Register a callback invoked with `(from, to)` on every state change.
    #[must_use]
    pub fn with_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Consecutive failures counted while closed.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.lock().failures
    }

    /// Time until an open circuit admits a trial call.
    ///
    /// `None` unless the circuit is open.
    #[must_use]
    pub fn remaining_open(&self) -> Option<Duration> {
        let now = self.clock.now();
        let state = self.lock();
        match (state.state, state.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                self.recovery_timeout
                    .saturating_sub(now.saturating_duration_since(opened_at)),
            ),
            _ => None,
        }
    }

    /// Ask to place a call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitOpen`] while the circuit is open, or while a
    /// half-open trial is outstanding.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>> {
        let now = self.clock.now();
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed => Ok(BreakerPermit::new(self, false)),
            CircuitState::Open => {
                let elapsed = state
                    .opened_at
                    .map_or(self.recovery_timeout, |at| now.saturating_duration_since(at));
                if elapsed < self.recovery_timeout {
                    return Err(Error::CircuitOpen {
                        remaining: self.recovery_timeout - elapsed,
                    });
                }
                state.trial_in_flight = true;
                let change = Self::transition(&mut state, CircuitState::HalfOpen);
                drop(state);
                self.notify(change);
                Ok(BreakerPermit::new(self, true))
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    return Err(Error::CircuitOpen {
                        remaining: Duration::ZERO,
                    });
                }
                state.trial_in_flight = true;
                Ok(BreakerPermit::new(self, true))
            }
        }
    }

    /// Force the circuit closed and clear the failure count.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.failures = 0;
        state.opened_at = None;
        state.trial_in_flight = false;
        let change = Self::transition(&mut state, CircuitState::Closed);
        drop(state);
        self.notify(change);
    }

    fn record_success(&self, trial: bool) {
        let mut state = self.lock();
        let change = match state.state {
            CircuitState::Closed => {
                state.failures = 0;
                None
            }
            CircuitState::HalfOpen if trial => {
                state.failures = 0;
                state.trial_in_flight = false;
                state.opened_at = None;
                Self::transition(&mut state, CircuitState::Closed)
            }
            CircuitState::HalfOpen | CircuitState::Open => None,
        };
        drop(state);
        self.notify(change);
    }

    fn record_failure(&self, trial: bool) {
        let now = self.clock.now();
        let mut state = self.lock();
        let change = match state.state {
            CircuitState::Closed => {
                state.failures += 1;
                if state.failures >= self.failure_threshold {
                    warn!(
                        failures = state.failures,
                        threshold = self.failure_threshold,
                        "Circuit breaker opening"
                    );
                    state.failures = 0;
                    state.opened_at = Some(now);
                    Self::transition(&mut state, CircuitState::Open)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen if trial => {
                warn!("Circuit breaker trial call failed, reopening");
                state.trial_in_flight = false;
                state.opened_at = Some(now);
                Self::transition(&mut state, CircuitState::Open)
            }
            CircuitState::HalfOpen | CircuitState::Open => None,
        };
        drop(state);
        self.notify(change);
    }

    fn release(&self, trial: bool) {
        if trial {
            let mut state = self.lock();
            if state.state == CircuitState::HalfOpen {
                state.trial_in_flight = false;
            }
        }
    }

    fn transition(
        state: &mut BreakerState,
        to: CircuitState,
    ) -> Option<(CircuitState, CircuitState)> {
        let from = state.state;
        if from == to {
            return None;
        }
        state.state = to;
        Some((from, to))
    }

    fn notify(&self, change: Option<(CircuitState, CircuitState)>) {
        let Some((from, to)) = change else {
            return;
        };
        info!(%from, %to, "Circuit breaker state change");
        if let Some(listener) = &self.listener {
            listener(from, to);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admission to place one call through a [`CircuitBreaker`].
///
/// Record the outcome with [`success`](Self::success) or
/// [`failure`](Self::failure). A permit dropped without an outcome frees the
/// half-open trial slot without counting a failure, unless
/// [`observe_failure`](Self::observe_failure) was called, in which case the
/// drop records that failure.
#[derive(Debug)]
#[must_use = "record the call outcome with `success` or `failure`"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    recorded: bool,
    failure_observed: bool,
}

impl<'a> BreakerPermit<'a> {
    const fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            recorded: false,
            failure_observed: false,
        }
    }

    /// Returns `true` if this permit is the half-open trial.
    #[must_use]
    pub const fn is_trial(&self) -> bool {
        self.trial
    }

    /// Note that the call has definitively failed, before the outcome is
    /// recorded.
    pub const fn observe_failure(&mut self) {
        self.failure_observed = true;
    }

    /// Record a successful call.
    pub fn success(mut self) {
        self.recorded = true;
        self.breaker.record_success(self.trial);
    }

    /// Record a failed call.
    pub fn failure(mut self) {
        self.recorded = true;
        self.breaker.record_failure(self.trial);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.recorded {
            return;
        }
        if self.failure_observed {
            self.breaker.record_failure(self.trial);
        } else {
            self.breaker.release(self.trial);
        }
    }
}

#[cfg(test)]
mod tests {
    use rampart_core::ManualClock;

    use super::*;

    const RECOVERY: Duration = Duration::from_secs(30);

    fn breaker(threshold: u32) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let breaker =
            CircuitBreaker::with_clock(threshold, RECOVERY, Arc::new(clock.clone())).expect("valid");
        (breaker, clock)
    }

    fn fail(breaker: &CircuitBreaker, times: u32) {
        for _ in 0..times {
            breaker.try_acquire().expect("admitted").failure();
        }
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let (breaker, _clock) = breaker(3);

        fail(&breaker, 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 2);

        fail(&breaker, 1);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), 0);

        let err = breaker.try_acquire().expect_err("open");
        assert!(err.is_circuit_open());
        assert_eq!(err.remaining(), Some(RECOVERY));
    }

    #[test]
    fn success_resets_failure_count() {
        let (breaker, _clock) = breaker(3);

        fail(&breaker, 2);
        breaker.try_acquire().expect("admitted").success();
        fail(&breaker, 2);

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 2);
    }

    #[test]
    fn rejects_until_recovery_timeout_elapses() {
        let (breaker, clock) = breaker(1);
        fail(&breaker, 1);

        clock.advance(RECOVERY - Duration::from_secs(1));
        let err = breaker.try_acquire().expect_err("still open");
        assert_eq!(err.remaining(), Some(Duration::from_secs(1)));
        assert_eq!(breaker.remaining_open(), Some(Duration::from_secs(1)));

        clock.advance(Duration::from_secs(1));
        let trial = breaker.try_acquire().expect("trial admitted");
        assert!(trial.is_trial());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        trial.success();
    }

    #[test]
    fn half_open_admits_a_single_trial() {
        let (breaker, clock) = breaker(1);
        fail(&breaker, 1);
        clock.advance(RECOVERY);

        let trial = breaker.try_acquire().expect("trial");
        assert!(breaker.try_acquire().expect_err("second call").is_circuit_open());
        assert!(breaker.try_acquire().expect_err("third call").is_circuit_open());

        trial.success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.try_acquire().expect("closed again").success();
    }

    #[test]
    fn trial_failure_reopens() {
        let (breaker, clock) = breaker(1);
        fail(&breaker, 1);
        clock.advance(RECOVERY);

        breaker.try_acquire().expect("trial").failure();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.remaining_open(), Some(RECOVERY));
    }

    #[test]
    fn dropped_trial_frees_slot_without_failure() {
        let (breaker, clock) = breaker(1);
        fail(&breaker, 1);
        clock.advance(RECOVERY);

        drop(breaker.try_acquire().expect("trial"));

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.try_acquire().expect("slot is free again").success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn dropped_permit_does_not_count_failure() {
        let (breaker, _clock) = breaker(2);

        fail(&breaker, 1);
        drop(breaker.try_acquire().expect("admitted"));

        assert_eq!(breaker.failure_count(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn dropped_permit_with_observed_failure_counts() {
        let (breaker, _clock) = breaker(1);

        let mut permit = breaker.try_acquire().expect("admitted");
        permit.observe_failure();
        drop(permit);

        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn listener_sees_every_transition() {
        let clock = ManualClock::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let breaker = CircuitBreaker::with_clock(1, RECOVERY, Arc::new(clock.clone()))
            .expect("valid")
            .with_listener(move |from, to| {
                sink.lock().expect("lock").push((from, to));
            });

        fail(&breaker, 1);
        clock.advance(RECOVERY);
        breaker.try_acquire().expect("trial").success();

        assert_eq!(
            *seen.lock().expect("lock"),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[test]
    fn reset_closes_circuit() {
        let (breaker, _clock) = breaker(1);
        fail(&breaker, 1);

        breaker.reset();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.remaining_open().is_none());
    }

    #[test]
    fn construction_validates_settings() {
        assert!(CircuitBreaker::new(0, RECOVERY).expect_err("threshold").is_config());
        assert!(
            CircuitBreaker::new(1, Duration::ZERO)
                .expect_err("recovery")
                .is_config()
        );
    }
}
