// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry, backoff, circuit breaking, batch retry and health probes.

pub mod batch;
pub mod circuit_breaker;
pub mod health;
pub mod retry;

pub use batch::{BatchRetryOptions, BatchRetryOutcome};
pub use circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitState};
pub use health::{HealthProbe, HealthReport, ProbeResult};
pub use retry::{
    Classify, ErrorClass, RetryCondition, RetryError, RetryManager, RetryOutcome, RetryPolicy,
};
