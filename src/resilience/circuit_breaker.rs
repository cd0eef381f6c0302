// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker using the recloser crate, layered over a [`RetryManager`].
//!
//! One call is one full retry loop. `failure_threshold` consecutive failed
//! calls trip the breaker; while open every call fails fast with
//! [`RetryError::CircuitOpen`] and zero attempts.
//!
//! States:
//! - Closed: Normal operation, calls pass through
//! - Open: Calls are rejected without attempting the operation
//! - HalfOpen: Recovery timeout elapsed, one trial call is let through
//!
//! recloser keeps its own clock and does not expose its state, so the
//! reported [`CircuitState`] is derived from call results.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use recloser::{AsyncRecloser, Error as RecloserError, Recloser};
use tracing::{debug, info, warn};

use super::retry::{Classify, RetryError, RetryManager, RetryOutcome};

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Consecutive failed calls that trip the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitConfig {
    /// Trips faster, waits longer before recovering
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(120),
        }
    }

    /// Tolerates more failures, retries sooner
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(15),
        }
    }

    /// Fast recovery for testing
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_threshold: 2,
            recovery_timeout: Duration::from_millis(50),
        }
    }
}

impl CircuitConfig {
    /// recloser trips when the failure rate over its closed window exceeds
    /// the threshold. With a window of `failure_threshold` calls, only a
    /// window of all failures exceeds this rate.
    fn build(&self) -> AsyncRecloser {
        let window = self.failure_threshold.max(1);
        let error_rate = (window as f32 - 0.5) / window as f32;
        Recloser::custom()
            .error_rate(error_rate)
            .closed_len(window as usize)
            .half_open_len(1)
            .open_wait(self.recovery_timeout)
            .build()
            .into()
    }
}

impl CircuitState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::HalfOpen,
            2 => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// A named circuit breaker with metrics tracking
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    retry: RetryManager,
    inner: RwLock<Arc<AsyncRecloser>>,
    state: AtomicU8,
    consecutive_failures: AtomicU32,

    // Metrics
    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name, config and retry manager
    pub fn new(name: impl Into<String>, config: CircuitConfig, retry: RetryManager) -> Self {
        let name = name.into();
        crate::metrics::set_circuit_state(&name, CircuitState::Closed as u8);
        Self {
            name,
            inner: RwLock::new(Arc::new(config.build())),
            config,
            retry,
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    /// Create with default config and the default retry policy
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitConfig::default(), RetryManager::default())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Last observed state. An open circuit only shows as half-open once a
    /// trial call is admitted.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Execute an async operation through the breaker and its retry loop
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);
        let recloser = Arc::clone(&self.inner.read());

        let guarded = async {
            // Only runs when recloser admits the call
            if self.state() == CircuitState::Open {
                info!(circuit = %self.name, "Circuit half-open, attempting recovery");
                self.set_state(CircuitState::HalfOpen);
            }
            let outcome = self.retry.execute_with_retry(&self.name, operation).await;
            if outcome.is_success() {
                Ok(outcome)
            } else {
                Err(outcome)
            }
        };

        match recloser.call(guarded).await {
            Ok(outcome) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                debug!(circuit = %self.name, attempts = outcome.attempts, "Circuit call succeeded");
                crate::metrics::record_circuit_breaker_call(&self.name, "success");
                self.on_success();
                outcome
            }
            Err(RecloserError::Inner(outcome)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                debug!(circuit = %self.name, attempts = outcome.attempts, "Circuit call failed");
                crate::metrics::record_circuit_breaker_call(&self.name, "failure");
                self.on_failure();
                outcome
            }
            Err(RecloserError::Rejected) => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                warn!(circuit = %self.name, "Circuit breaker rejected call (open)");
                crate::metrics::record_circuit_breaker_call(&self.name, "rejected");
                self.set_state(CircuitState::Open);
                RetryOutcome {
                    result: Err(RetryError::CircuitOpen(self.name.clone())),
                    attempts: 0,
                    total_time: Duration::ZERO,
                }
            }
        }
    }

    /// Manually close the circuit and clear the failure count
    pub fn reset(&self) {
        *self.inner.write() = Arc::new(self.config.build());
        self.consecutive_failures.store(0, Ordering::Release);
        self.set_state(CircuitState::Closed);
    }

    fn set_state(&self, state: CircuitState) {
        self.state.store(state as u8, Ordering::Release);
        crate::metrics::set_circuit_state(&self.name, state as u8);
    }

    fn on_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        if self.state() != CircuitState::Closed {
            info!(circuit = %self.name, "Circuit closed after successful trial");
            self.set_state(CircuitState::Closed);
        }
    }

    fn on_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        let was = self.state();
        if was == CircuitState::HalfOpen || failures >= self.config.failure_threshold {
            if was != CircuitState::Open {
                warn!(circuit = %self.name, failures, "Circuit breaker opened");
            }
            self.set_state(CircuitState::Open);
        }
    }

    /// Get total number of calls
    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    /// Get number of successful calls
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Get number of failed calls (operation errors after retries)
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Get number of rejected calls (circuit open)
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Get failure rate (0.0 - 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = self.calls_total();
        if total == 0 {
            return 0.0;
        }
        self.failures() as f64 / total as f64
    }

    /// Reset all metrics
    pub fn reset_metrics(&self) {
        self.calls_total.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.rejections.store(0, Ordering::Relaxed);
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("calls_total", &self.calls_total())
            .finish()
    }
}
