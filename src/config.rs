// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the schedule sync engine.
//!
//! # Example
//!
//! ```
//! use schedule_sync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.debounce_ms, 500);
//! assert_eq!(config.batch_interval_ms, 2500);
//!
//! // Tuned config
//! let config = SyncConfig {
//!     key_prefix: "planner-test-".into(),
//!     batch_interval_ms: 1000,
//!     ..Default::default()
//! };
//! assert_eq!(config.max_intent_retries, 3);
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the sync engine.
///
/// All fields have defaults matching the planner's production timings.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Prefix applied to every durable key (default: "wpi-planner-")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Quiet period before a dirty orchestrator flushes to the store
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Interval between coordinator sync passes
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,

    /// Advisory batch size; larger queues are logged, never split
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// How long the "saved" indicator stays up before returning to idle
    #[serde(default = "default_success_feedback_ms")]
    pub success_feedback_ms: u64,

    /// How long the "error" indicator stays up before returning to idle
    #[serde(default = "default_error_feedback_ms")]
    pub error_feedback_ms: u64,

    /// Whether the coordinator drives save indicators at all
    #[serde(default = "default_visual_feedback")]
    pub visual_feedback: bool,

    /// Failed replays before an intent is dropped
    #[serde(default = "default_max_intent_retries")]
    pub max_intent_retries: u32,

    /// Age after which an open transaction is reported as stuck
    #[serde(default = "default_stuck_transaction_secs")]
    pub stuck_transaction_secs: u64,

    /// Entries kept in the transaction audit log
    #[serde(default = "default_audit_log_cap")]
    pub audit_log_cap: usize,
}

fn default_key_prefix() -> String { "wpi-planner-".to_string() }
fn default_debounce_ms() -> u64 { 500 }
fn default_batch_interval_ms() -> u64 { 2500 }
fn default_max_batch_size() -> usize { 10 }
fn default_success_feedback_ms() -> u64 { 1500 }
fn default_error_feedback_ms() -> u64 { 3000 }
fn default_visual_feedback() -> bool { true }
fn default_max_intent_retries() -> u32 { 3 }
fn default_stuck_transaction_secs() -> u64 { 30 }
fn default_audit_log_cap() -> usize { 50 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            debounce_ms: default_debounce_ms(),
            batch_interval_ms: default_batch_interval_ms(),
            max_batch_size: default_max_batch_size(),
            success_feedback_ms: default_success_feedback_ms(),
            error_feedback_ms: default_error_feedback_ms(),
            visual_feedback: default_visual_feedback(),
            max_intent_retries: default_max_intent_retries(),
            stuck_transaction_secs: default_stuck_transaction_secs(),
            audit_log_cap: default_audit_log_cap(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    #[must_use]
    pub fn success_feedback(&self) -> Duration {
        Duration::from_millis(self.success_feedback_ms)
    }

    #[must_use]
    pub fn error_feedback(&self) -> Duration {
        Duration::from_millis(self.error_feedback_ms)
    }

    #[must_use]
    pub fn stuck_transaction_after(&self) -> Duration {
        Duration::from_secs(self.stuck_transaction_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.key_prefix, "wpi-planner-");
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_eq!(config.batch_interval(), Duration::from_millis(2500));
        assert_eq!(config.success_feedback(), Duration::from_millis(1500));
        assert_eq!(config.error_feedback(), Duration::from_millis(3000));
        assert_eq!(config.stuck_transaction_after(), Duration::from_secs(30));
    }

    #[test]
    fn test_deserialize_partial_fills_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"debounce_ms": 50, "key_prefix": "t-"}"#).unwrap();
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.key_prefix, "t-");
        assert_eq!(config.batch_interval_ms, 2500);
        assert_eq!(config.max_intent_retries, 3);
        assert!(config.visual_feedback);
    }
}
