// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for schedule-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application chooses the exporter.
//!
//! # Metric Naming Convention
//! - `schedule_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `layer`: store, orchestrator, cache, coordinator
//! - `operation`: transaction, write, export, import, sync, ...
//! - `status`: success, error, rolled_back, rejected

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record an operation outcome
pub fn record_operation(layer: &str, operation: &str, status: &str) {
    counter!(
        "schedule_sync_operations_total",
        "layer" => layer.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(layer: &str, operation: &str, duration: Duration) {
    histogram!(
        "schedule_sync_operation_seconds",
        "layer" => layer.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// DURABLE STORE - Transactions and integrity
// ═══════════════════════════════════════════════════════════════════════════

/// Record a finished transaction (committed or rolled back)
pub fn record_transaction(committed: bool, ops: usize) {
    let status = if committed { "committed" } else { "rolled_back" };
    counter!(
        "schedule_sync_transactions_total",
        "status" => status
    )
    .increment(1);
    histogram!("schedule_sync_transaction_ops").record(ops as f64);
}

/// Record a slot that failed to parse and fell back to its default
pub fn record_corruption(slot: &str) {
    counter!(
        "schedule_sync_corruption_detected_total",
        "slot" => slot.to_string()
    )
    .increment(1);
}

/// Record an import refused for a checksum mismatch
pub fn record_checksum_mismatch() {
    counter!("schedule_sync_checksum_mismatch_total").increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// RESILIENCE - Retries and circuit breakers
// ═══════════════════════════════════════════════════════════════════════════

/// Record a retry attempt after a failure
pub fn record_retry(operation: &str) {
    counter!(
        "schedule_sync_retries_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record circuit breaker call outcome
pub fn record_circuit_breaker_call(circuit: &str, outcome: &str) {
    counter!(
        "schedule_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set circuit breaker state (0 = closed, 1 = half-open, 2 = open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "schedule_sync_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(state as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// SYNC - Intent queue and coordinator passes
// ═══════════════════════════════════════════════════════════════════════════

/// Set the number of intents waiting in the optimistic cache
pub fn set_pending_intents(count: usize) {
    gauge!("schedule_sync_pending_intents").set(count as f64);
}

/// Record intent replay outcomes for one pass
pub fn record_intents(applied: usize, failed: usize, dropped: usize) {
    counter!("schedule_sync_intents_applied_total").increment(applied as u64);
    counter!("schedule_sync_intents_failed_total").increment(failed as u64);
    counter!("schedule_sync_intents_dropped_total").increment(dropped as u64);
}

/// Record a finished coordinator pass
pub fn record_sync_pass(success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "schedule_sync_passes_total",
        "status" => status
    )
    .increment(1);
    histogram!("schedule_sync_pass_seconds").record(duration.as_secs_f64());
}

/// Set whether the orchestrator has unsaved changes (1 = dirty)
pub fn set_dirty(dirty: bool) {
    gauge!("schedule_sync_state_dirty").set(if dirty { 1.0 } else { 0.0 });
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    layer: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(layer: &'static str, operation: &'static str) -> Self {
        Self {
            layer,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.layer, self.operation, self.start.elapsed());
    }
}

/// Convenience macro for timing operations
#[macro_export]
macro_rules! time_operation {
    ($layer:expr, $op:expr) => {
        $crate::metrics::LatencyTimer::new($layer, $op)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    // These verify the API doesn't panic without an installed recorder.

    #[test]
    fn test_record_operation() {
        record_operation("store", "transaction", "success");
        record_operation("cache", "sync", "error");
    }

    #[test]
    fn test_store_metrics() {
        record_transaction(true, 4);
        record_transaction(false, 2);
        record_corruption("preferences");
        record_checksum_mismatch();
    }

    #[test]
    fn test_resilience_metrics() {
        record_retry("storage operation");
        record_circuit_breaker_call("store", "rejected");
        set_circuit_state("store", 2);
    }

    #[test]
    fn test_sync_metrics() {
        set_pending_intents(3);
        record_intents(2, 1, 0);
        record_sync_pass(true, Duration::from_millis(12));
        set_dirty(true);
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = LatencyTimer::new("store", "transaction");
            std::thread::sleep(Duration::from_micros(10));
        }
    }
}
