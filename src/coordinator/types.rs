// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync coordinator.

use std::time::Duration;

use async_trait::async_trait;

use crate::cache::{SyncError, SyncOutcome};
use crate::config::SyncConfig;

/// Save indicator lifecycle.
///
/// ```text
/// Idle → Saving → Saved ─(1.5s)→ Idle
///               ↘ Error ─(3s)──→ Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveState {
    #[default]
    Idle,
    Saving,
    Saved,
    Error,
}

impl std::fmt::Display for SaveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Saving => write!(f, "Saving"),
            Self::Saved => write!(f, "Saved"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Hook for UI save indicators. Any `Fn(SaveState)` closure qualifies.
pub trait SaveIndicator: Send + Sync {
    fn on_save_state(&self, state: SaveState);
}

impl<F> SaveIndicator for F
where
    F: Fn(SaveState) + Send + Sync,
{
    fn on_save_state(&self, state: SaveState) {
        self(state);
    }
}

/// Something with queued work a coordinator can drain
#[async_trait]
pub trait SyncSource: Send + Sync {
    fn has_pending(&self) -> bool;

    fn pending_count(&self) -> usize;

    /// Run one pass over everything queued when it starts
    async fn sync(&self) -> Result<SyncOutcome, SyncError>;
}

/// Result of one coordinator batch, delivered to batch listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub batch_id: String,
    /// True when the pass ran to completion; requeued intents do not
    /// count against it
    pub success: bool,
    pub intents_processed: usize,
    /// Requeued plus dropped
    pub intents_failed: usize,
    pub sync_outcome: Option<SyncOutcome>,
    pub error: Option<SyncError>,
    pub duration: Duration,
}

impl BatchResult {
    pub(super) fn rejected(batch_id: String, error: SyncError) -> Self {
        Self {
            batch_id,
            success: false,
            intents_processed: 0,
            intents_failed: 0,
            sync_outcome: None,
            error: Some(error),
            duration: Duration::ZERO,
        }
    }

    pub(super) fn from_pass(batch_id: String, pass: Result<SyncOutcome, SyncError>, duration: Duration) -> Self {
        match pass {
            Ok(outcome) => Self {
                batch_id,
                success: true,
                intents_processed: outcome.intents_processed(),
                intents_failed: outcome.intents_failed + outcome.intents_dropped,
                sync_outcome: Some(outcome),
                error: None,
                duration,
            },
            Err(error) => Self {
                batch_id,
                success: false,
                intents_processed: 0,
                intents_failed: 0,
                sync_outcome: None,
                error: Some(error),
                duration,
            },
        }
    }
}

/// Batch listener signature
pub type BatchListener = dyn Fn(&BatchResult) + Send + Sync;

/// Runtime-adjustable coordinator options
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorOptions {
    pub batch_interval: Duration,
    /// Advisory only. A pass never splits the queue: it drains everything
    /// queued before it starts and logs at debug level when the queue is
    /// larger than this.
    pub max_batch_size: usize,
    pub visual_feedback: bool,
    pub success_feedback: Duration,
    pub error_feedback: Duration,
}

impl From<&SyncConfig> for CoordinatorOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            batch_interval: config.batch_interval(),
            max_batch_size: config.max_batch_size,
            visual_feedback: config.visual_feedback,
            success_feedback: config.success_feedback(),
            error_feedback: config.error_feedback(),
        }
    }
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_state_display() {
        assert_eq!(SaveState::default(), SaveState::Idle);
        assert_eq!(format!("{}", SaveState::Saving), "Saving");
        assert_eq!(format!("{}", SaveState::Error), "Error");
    }

    #[test]
    fn test_batch_result_from_pass() {
        let outcome = SyncOutcome {
            intents_applied: 3,
            intents_failed: 1,
            ..SyncOutcome::default()
        };
        let result = BatchResult::from_pass("b1".into(), Ok(outcome), Duration::from_millis(4));
        assert!(result.success);
        assert_eq!(result.intents_processed, 4);
        assert_eq!(result.intents_failed, 1);

        let aborted = BatchResult::from_pass("b2".into(), Err(SyncError::Aborted("x".into())), Duration::ZERO);
        assert!(!aborted.success);
        assert!(aborted.sync_outcome.is_none());
    }

    #[test]
    fn test_options_from_config() {
        let options = CoordinatorOptions::default();
        assert_eq!(options.batch_interval, Duration::from_millis(2500));
        assert_eq!(options.success_feedback, Duration::from_millis(1500));
        assert_eq!(options.error_feedback, Duration::from_millis(3000));
    }
}
