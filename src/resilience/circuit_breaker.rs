//! # Circuit Breaker Implementation
//!
//! Provides fault isolation for calls to unreliable dependencies (the durable
//! cache tier, domain handler backends). Classic three-state machine:
//! Closed (normal operation), Open (failing fast) and Half-Open (a single
//! probe call decides whether to close or re-open).
//!
//! State lives in atomics so the breaker can be shared behind an `Arc` by every
//! concurrent request in the process without a lock on the hot path. State
//! transitions take a short `parking_lot` lock so the open timer and the state
//! always change together.

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lock-free atomic counters for circuit breaker metrics.
#[derive(Debug)]
struct AtomicCircuitBreakerMetrics {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    consecutive_failures: AtomicU64,
    rejected_calls: AtomicU64,
    probe_calls: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl AtomicCircuitBreakerMetrics {
    fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            probe_calls: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record_success(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    fn record_failure(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    fn record_rejection(&self) {
        self.rejected_calls.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn increment_consecutive_failures(&self) -> u64 {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[inline]
    fn reset_consecutive_failures(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    fn snapshot(&self, state: CircuitState) -> CircuitBreakerMetrics {
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let failure_count = self.failure_count.load(Ordering::Relaxed);
        let total_duration_nanos = self.total_duration_nanos.load(Ordering::Relaxed);

        let (failure_rate, average_duration) = if total_calls > 0 {
            (
                failure_count as f64 / total_calls as f64,
                Duration::from_nanos(total_duration_nanos / total_calls),
            )
        } else {
            (0.0, Duration::ZERO)
        };

        CircuitBreakerMetrics {
            total_calls,
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count,
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            probe_calls: self.probe_calls.load(Ordering::Relaxed),
            current_state: state,
            failure_rate,
            average_duration,
        }
    }
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - a single probe call is allowed through
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the operation was not invoked
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation ran, failed, and the failure was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// How a call was let through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Re-opens the circuit if a half-open probe is dropped before it completes.
///
/// Timeouts abandon futures rather than cancelling the work behind them; an
/// abandoned probe must not leave the breaker stuck in `HalfOpen`.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl<'a> ProbeGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, admission: Admission) -> Self {
        Self {
            breaker,
            armed: admission == Admission::Probe,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                component = %self.breaker.name,
                "Half-open probe abandoned before completion, re-opening circuit"
            );
            self.breaker.transition_to_open();
        }
    }
}

/// Core circuit breaker implementation with atomic state management
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Current circuit state (atomic for thread safety)
    state: AtomicU8,

    config: CircuitBreakerConfig,

    metrics: AtomicCircuitBreakerMetrics,

    /// Reference point for `opened_at_nanos`
    epoch: Instant,

    /// Nanos since `epoch` at which the circuit last opened. Only meaningful while Open.
    opened_at_nanos: AtomicU64,

    /// Set while the single half-open probe is running
    probe_in_flight: AtomicBool,

    /// Serializes state transitions
    transition: Mutex<()>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            open_duration_ms = config.open_duration.as_millis() as u64,
            "Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            metrics: AtomicCircuitBreakerMetrics::new(),
            epoch: Instant::now(),
            opened_at_nanos: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
            transition: Mutex::new(()),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// While the circuit is open the operation is never invoked and
    /// `CircuitBreakerError::CircuitOpen` is returned immediately.
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(admission) = self.try_admit() else {
            self.metrics.record_rejection();
            debug!(component = %self.name, "Circuit open, rejecting call");
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        };

        let mut guard = ProbeGuard::new(self, admission);

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        guard.disarm();

        match &result {
            Ok(_) => self.record_success(admission, duration),
            Err(_) => self.record_failure(admission, duration),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Decide whether a call may proceed, and in which capacity
    fn try_admit(&self) -> Option<Admission> {
        match self.state() {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                if self.open_elapsed() < self.config.open_duration {
                    return None;
                }
                self.transition_to_half_open();
                self.try_claim_probe()
            }
            CircuitState::HalfOpen => self.try_claim_probe(),
        }
    }

    fn try_claim_probe(&self) -> Option<Admission> {
        if self
            .probe_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        // The probe may have been claimed against a stale HalfOpen read
        if self.state() != CircuitState::HalfOpen {
            self.probe_in_flight.store(false, Ordering::SeqCst);
            return None;
        }

        self.metrics.probe_calls.fetch_add(1, Ordering::Relaxed);
        debug!(component = %self.name, "Admitting half-open probe");
        Some(Admission::Probe)
    }

    fn open_elapsed(&self) -> Duration {
        let opened = Duration::from_nanos(self.opened_at_nanos.load(Ordering::SeqCst));
        self.epoch.elapsed().saturating_sub(opened)
    }

    fn record_success(&self, admission: Admission, duration: Duration) {
        self.metrics.record_success(duration);

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "Operation succeeded"
        );

        match admission {
            Admission::Probe => self.transition_to_closed(),
            Admission::Normal => {
                if self.state() == CircuitState::Closed {
                    self.metrics.reset_consecutive_failures();
                }
            }
        }
    }

    fn record_failure(&self, admission: Admission, duration: Duration) {
        self.metrics.record_failure(duration);

        warn!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "Operation failed"
        );

        match admission {
            Admission::Probe => self.transition_to_open(),
            Admission::Normal => {
                // Stragglers that started before the circuit opened do not count again
                if self.state() != CircuitState::Closed {
                    return;
                }
                let failures = self.metrics.increment_consecutive_failures();
                if failures >= u64::from(self.config.failure_threshold) {
                    self.transition_to_open();
                }
            }
        }
    }

    /// Transition to closed state (normal operation)
    fn transition_to_closed(&self) {
        let _transition = self.transition.lock();
        self.metrics.reset_consecutive_failures();
        self.state
            .store(CircuitState::Closed as u8, Ordering::SeqCst);
        self.probe_in_flight.store(false, Ordering::SeqCst);

        info!(
            component = %self.name,
            total_calls = self.metrics.total_calls.load(Ordering::Relaxed),
            "Circuit breaker closed (recovered)"
        );
    }

    /// Transition to open state (failing fast); restarts the open timer
    fn transition_to_open(&self) {
        let _transition = self.transition.lock();
        self.opened_at_nanos
            .store(self.epoch.elapsed().as_nanos() as u64, Ordering::SeqCst);
        let previous = self.state.swap(CircuitState::Open as u8, Ordering::SeqCst);
        self.probe_in_flight.store(false, Ordering::SeqCst);

        error!(
            component = %self.name,
            previous_state = %CircuitState::from(previous),
            consecutive_failures = self.metrics.consecutive_failures.load(Ordering::Relaxed),
            failure_threshold = self.config.failure_threshold,
            open_duration_ms = self.config.open_duration.as_millis() as u64,
            "Circuit breaker opened (failing fast)"
        );
    }

    /// Transition to half-open state if the open period has run out.
    ///
    /// The elapsed check is repeated under the transition lock: the caller's
    /// earlier read may predate a failed probe that restarted the timer.
    fn transition_to_half_open(&self) -> bool {
        let _transition = self.transition.lock();
        if self.state() != CircuitState::Open || self.open_elapsed() < self.config.open_duration {
            return false;
        }
        self.state
            .store(CircuitState::HalfOpen as u8, Ordering::SeqCst);
        info!(component = %self.name, "Circuit breaker half-open (probing recovery)");
        true
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        self.transition_to_open();
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "Circuit breaker forced closed");
        self.transition_to_closed();
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.metrics.snapshot(self.state())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Closed and failing less than 10% of calls
    pub fn is_healthy(&self) -> bool {
        self.metrics().is_healthy()
    }
}
