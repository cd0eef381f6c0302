// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync coordinator.
//!
//! The [`SyncCoordinator`] drives sync passes over a [`SyncSource`] (the
//! optimistic cache in production): on a fixed interval while started, or
//! on demand via [`process_batch_now`](SyncCoordinator::process_batch_now).
//! A boolean guard keeps passes from overlapping; a tick that finds a pass
//! in flight or nothing queued does nothing.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use schedule_sync::{
//!     InMemoryCatalog, InMemoryMedium, DurableStore, OptimisticCache, StateOrchestrator,
//!     SyncConfig, SyncCoordinator,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = SyncConfig::default();
//! let store = Arc::new(DurableStore::new(Arc::new(InMemoryMedium::new()), &config));
//! let orchestrator = StateOrchestrator::new(store, Arc::new(InMemoryCatalog::new()), &config);
//! orchestrator.load_from_storage();
//!
//! let cache = Arc::new(OptimisticCache::new(orchestrator, &config));
//! let coordinator = SyncCoordinator::new(cache, &config);
//! coordinator.start();
//!
//! let result = coordinator.process_batch_now().await;
//! assert!(result.error.is_none());
//! # }
//! ```

mod feedback;
mod types;

pub use types::{BatchListener, BatchResult, CoordinatorOptions, SaveIndicator, SaveState, SyncSource};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::SyncError;
use crate::config::SyncConfig;
use crate::listeners::{ListenerId, ListenerSet};
use crate::timer::RecurringTask;

use feedback::Feedback;

struct Inner {
    source: Arc<dyn SyncSource>,
    options: RwLock<CoordinatorOptions>,
    processing: AtomicBool,
    ticker: RecurringTask,
    feedback: Feedback,
    listeners: ListenerSet<BatchListener>,
    batch_counter: AtomicU64,
}

/// Clears the in-flight flag even if the pass future is dropped
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodic batch driver. Clones share the same coordinator.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    pub fn new(source: Arc<dyn SyncSource>, config: &SyncConfig) -> Self {
        Self::with_options(source, CoordinatorOptions::from(config))
    }

    pub fn with_options(source: Arc<dyn SyncSource>, options: CoordinatorOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                options: RwLock::new(options),
                processing: AtomicBool::new(false),
                ticker: RecurringTask::new("sync_coordinator"),
                feedback: Feedback::new(),
                listeners: ListenerSet::new(),
                batch_counter: AtomicU64::new(0),
            }),
        }
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Start the periodic ticker. Restarts it if already running.
    pub fn start(&self) {
        let interval = self.inner.options.read().batch_interval;
        let weak = Arc::downgrade(&self.inner);
        self.inner.ticker.start(interval, move || tick(weak.clone()));
        info!(interval_ms = interval.as_millis() as u64, "Sync coordinator started");
    }

    /// Stop ticking. A pass already running completes.
    pub fn stop(&self) {
        if self.inner.ticker.stop() {
            info!("Sync coordinator stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.ticker.is_running()
    }

    /// Replace the options; restarts the ticker if the interval changed
    /// while running.
    pub fn update_options(&self, options: CoordinatorOptions) {
        let interval_changed = {
            let mut current = self.inner.options.write();
            let changed = current.batch_interval != options.batch_interval;
            *current = options;
            changed
        };
        if interval_changed && self.is_running() {
            debug!("Batch interval changed; restarting ticker");
            self.start();
        }
    }

    #[must_use]
    pub fn options(&self) -> CoordinatorOptions {
        self.inner.options.read().clone()
    }

    // ─── Batches ────────────────────────────────────────────────────────

    /// Run a pass now, bypassing the timer. Fails immediately with
    /// [`SyncError::AlreadyInProgress`] if one is in flight.
    pub async fn process_batch_now(&self) -> BatchResult {
        let batch_id = self.inner.next_batch_id();
        if self.inner.processing.swap(true, Ordering::AcqRel) {
            debug!(batch_id = %batch_id, "Batch rejected: pass in flight");
            return BatchResult::rejected(batch_id, SyncError::AlreadyInProgress);
        }
        let _guard = ProcessingGuard(&self.inner.processing);
        self.inner.run_batch(batch_id).await
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.source.pending_count()
    }

    // ─── Feedback and listeners ─────────────────────────────────────────

    #[must_use]
    pub fn save_state(&self) -> SaveState {
        self.inner.feedback.current()
    }

    /// Watch save-state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SaveState> {
        self.inner.feedback.subscribe()
    }

    pub fn add_save_indicator(&self, indicator: impl SaveIndicator + 'static) -> ListenerId {
        self.inner.feedback.add_indicator(Arc::new(indicator))
    }

    pub fn remove_save_indicator(&self, id: ListenerId) -> bool {
        self.inner.feedback.remove_indicator(id)
    }

    pub fn add_listener(&self, listener: impl Fn(&BatchResult) + Send + Sync + 'static) -> ListenerId {
        self.inner.listeners.add(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }
}

async fn tick(weak: Weak<Inner>) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    if !inner.source.has_pending() {
        return;
    }
    if inner.processing.swap(true, Ordering::AcqRel) {
        debug!("Tick skipped: pass in flight");
        return;
    }
    let _guard = ProcessingGuard(&inner.processing);
    let batch_id = inner.next_batch_id();
    inner.run_batch(batch_id).await;
}

impl Inner {
    fn next_batch_id(&self) -> String {
        let n = self.batch_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("batch_{}_{n}", chrono::Utc::now().timestamp_millis())
    }

    /// Caller holds the processing guard
    #[tracing::instrument(skip(self), fields(pending = tracing::field::Empty))]
    async fn run_batch(&self, batch_id: String) -> BatchResult {
        let options = self.options.read().clone();
        let pending = self.source.pending_count();
        tracing::Span::current().record("pending", pending);

        if options.visual_feedback {
            self.feedback.saving();
        }

        let started = Instant::now();
        let pass = self.source.sync().await;
        let result = BatchResult::from_pass(batch_id, pass, started.elapsed());

        if options.visual_feedback {
            let hold = if result.success { options.success_feedback } else { options.error_feedback };
            self.feedback.settle(result.success, hold);
        }

        let status = if result.success { "success" } else { "error" };
        crate::metrics::record_operation("coordinator", "batch", status);
        crate::metrics::record_latency("coordinator", "batch", result.duration);
        if pending > options.max_batch_size {
            debug!(pending, advisory_max = options.max_batch_size, "Batch larger than advisory size");
        }

        match &result.error {
            Some(error) => warn!(batch_id = %result.batch_id, error = %error, "Batch failed"),
            None => debug!(
                batch_id = %result.batch_id,
                processed = result.intents_processed,
                failed = result.intents_failed,
                "Batch complete"
            ),
        }

        self.listeners.notify("batch", |listener| listener(&result));
        result
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("running", &self.is_running())
            .field("processing", &self.is_processing())
            .field("save_state", &self.save_state())
            .finish()
    }
}
