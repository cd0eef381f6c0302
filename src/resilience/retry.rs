// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff and jitter.
//!
//! [`RetryManager::execute_with_retry`] never fails: it always hands back a
//! [`RetryOutcome`] carrying the final result, the number of attempts made and
//! the total time spent. Whether a failure is retried is decided by the
//! policy's [`RetryCondition`] over the error's [`ErrorClass`].
//!
//! # Example
//!
//! ```
//! use schedule_sync::resilience::{RetryPolicy, ErrorClass};
//! use std::time::Duration;
//!
//! // Storage: short backoff, transient storage errors only
//! let storage = RetryPolicy::storage();
//! assert_eq!(storage.max_attempts, 3);
//! assert!(storage.retry_condition.allows(ErrorClass::TransientStorage, 1));
//! assert!(!storage.retry_condition.allows(ErrorClass::Corruption, 1));
//!
//! // Network: longer backoff plus a per-attempt timeout
//! let network = RetryPolicy::network();
//! assert_eq!(network.timeout, Some(Duration::from_secs(30)));
//!
//! // Transaction: fast, fixed delay
//! let tx = RetryPolicy::transaction();
//! assert!(!tx.exponential_backoff);
//! assert_eq!(tx.backoff(2), Duration::from_millis(100));
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

/// Coarse classification used by retry conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Quota, security or medium-unavailable errors that may clear on their own
    TransientStorage,
    Network,
    Timeout,
    /// Concurrent-writer or nested-transaction conflicts
    Conflict,
    /// A post-write verification failed
    Integrity,
    /// Stored data could not be parsed
    Corruption,
    Permanent,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TransientStorage => "transient_storage",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Conflict => "conflict",
            Self::Integrity => "integrity",
            Self::Corruption => "corruption",
            Self::Permanent => "permanent",
        };
        f.write_str(s)
    }
}

/// Errors that can be classified for retry decisions
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

/// Failure reported by a retried operation
#[derive(Debug, Clone, thiserror::Error)]
pub enum RetryError<E> {
    /// The operation itself failed
    #[error("operation failed: {0}")]
    Operation(E),

    /// One attempt exceeded the per-attempt timeout
    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),

    /// The circuit breaker rejected the call without attempting it
    #[error("circuit breaker '{0}' open, request rejected")]
    CircuitOpen(String),
}

impl<E: Classify> Classify for RetryError<E> {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Operation(e) => e.class(),
            Self::TimedOut(_) => ErrorClass::Timeout,
            Self::CircuitOpen(_) => ErrorClass::Permanent,
        }
    }
}

impl<E> RetryError<E> {
    /// The underlying operation error, if that is what stopped the loop
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }
}

/// Predicate deciding whether a failed attempt is retried
#[derive(Clone)]
pub enum RetryCondition {
    Always,
    Never,
    Classes(Vec<ErrorClass>),
    Custom(Arc<dyn Fn(ErrorClass, u32) -> bool + Send + Sync>),
}

impl RetryCondition {
    /// Whether an error of `class` on attempt `attempt` (1-based) may be retried
    #[must_use]
    pub fn allows(&self, class: ErrorClass, attempt: u32) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Classes(classes) => classes.contains(&class),
            Self::Custom(predicate) => predicate(class, attempt),
        }
    }
}

impl fmt::Debug for RetryCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::Never => write!(f, "Never"),
            Self::Classes(c) => f.debug_tuple("Classes").field(c).finish(),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Retry behaviour for one class of operation.
///
/// Use the preset constructors for common patterns:
/// - [`RetryPolicy::storage()`] - local medium writes
/// - [`RetryPolicy::network()`] - slow external fetches
/// - [`RetryPolicy::transaction()`] - quick conflict retries
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_backoff: bool,
    /// Randomize each delay by up to ±25%
    pub jitter: bool,
    /// Per-attempt timeout; exceeding it fails that attempt only
    pub timeout: Option<Duration>,
    pub retry_condition: RetryCondition,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            exponential_backoff: true,
            jitter: true,
            timeout: None,
            retry_condition: RetryCondition::Classes(vec![
                ErrorClass::TransientStorage,
                ErrorClass::Conflict,
                ErrorClass::Network,
                ErrorClass::Timeout,
            ]),
        }
    }
}

impl RetryPolicy {
    /// Local medium operations: 3 attempts, 500ms base, transient storage errors only.
    #[must_use]
    pub fn storage() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            exponential_backoff: true,
            jitter: true,
            timeout: None,
            retry_condition: RetryCondition::Classes(vec![ErrorClass::TransientStorage]),
        }
    }

    /// Network-style operations: 5 attempts, 1s base capped at 30s, 30s per attempt.
    #[must_use]
    pub fn network() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential_backoff: true,
            jitter: true,
            timeout: Some(Duration::from_secs(30)),
            retry_condition: RetryCondition::Classes(vec![ErrorClass::Network, ErrorClass::Timeout]),
        }
    }

    /// Transaction conflicts: 2 quick attempts, no backoff.
    #[must_use]
    pub fn transaction() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            exponential_backoff: false,
            jitter: false,
            timeout: None,
            retry_condition: RetryCondition::Classes(vec![ErrorClass::Conflict, ErrorClass::Integrity]),
        }
    }

    /// Fast retry for tests (minimal delays, retries everything)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            exponential_backoff: true,
            jitter: false,
            timeout: None,
            retry_condition: RetryCondition::Always,
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: RetryCondition) -> Self {
        self.retry_condition = condition;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Delay before the attempt following `attempt` (1-based), without jitter.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        if !self.exponential_backoff {
            return self.base_delay;
        }
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if !self.jitter {
            return delay;
        }
        let factor: f64 = rand::rng().random_range(-0.25..=0.25);
        delay.mul_f64(1.0 + factor)
    }
}

/// Result of a retried operation. Never an error by itself.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, RetryError<E>>,
    /// Attempts actually made (0 when a circuit breaker rejected the call)
    pub attempts: u32,
    pub total_time: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, RetryError<E>> {
        self.result
    }
}

/// Executes operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryManager {
    policy: RetryPolicy,
}

impl RetryManager {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn storage() -> Self {
        Self::new(RetryPolicy::storage())
    }

    #[must_use]
    pub fn network() -> Self {
        Self::new(RetryPolicy::network())
    }

    #[must_use]
    pub fn transaction() -> Self {
        Self::new(RetryPolicy::transaction())
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn update_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
    }

    /// Run `operation` until it succeeds, the retry condition refuses, or the
    /// attempts run out.
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let started = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = match self.policy.timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(inner) => inner.map_err(RetryError::Operation),
                    Err(_) => Err(RetryError::TimedOut(limit)),
                },
                None => operation().await.map_err(RetryError::Operation),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation = operation_name, attempts = attempt, "Operation succeeded after retry");
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        total_time: started.elapsed(),
                    };
                }
                Err(err) => {
                    let class = err.class();
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        error = %err,
                        class = %class,
                        "Operation attempt failed"
                    );

                    if attempt >= max_attempts || !self.policy.retry_condition.allows(class, attempt) {
                        let total_time = started.elapsed();
                        error!(
                            operation = operation_name,
                            attempts = attempt,
                            elapsed_ms = total_time.as_millis() as u64,
                            "Operation failed, giving up"
                        );
                        return RetryOutcome {
                            result: Err(err),
                            attempts: attempt,
                            total_time,
                        };
                    }

                    let delay = self.policy.next_delay(attempt);
                    crate::metrics::record_retry(operation_name);
                    info!(operation = operation_name, next_attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Retrying");
                    sleep(delay).await;
                }
            }
        }
    }
}
