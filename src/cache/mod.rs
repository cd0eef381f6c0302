// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Optimistic front-line cache.
//!
//! The cache holds its own selection list and answers every user-facing
//! read and write synchronously. Each write is also queued as a
//! [`PendingIntent`]; a sync pass replays the queue into the
//! [`StateOrchestrator`] and re-bases the cache on the result.
//!
//! # Sync pass
//!
//! ```text
//! 1. reconcile   cache and orchestrator disagree on a section → cache wins
//! 2. drain       intents queued before the pass, FIFO
//! 3. requeue     failures go back to the front with retry_count + 1,
//!                dropped once retry_count reaches the limit
//! 4. refresh     rebase on the orchestrator, replay what is still pending
//! ```

pub mod intent;

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::coordinator::SyncSource;
use crate::listeners::{ListenerId, ListenerSet};
use crate::model::{Course, SelectionEntry};
use crate::orchestrator::{ChangeSource, StateOrchestrator};

pub use intent::{IntentApplyError, IntentKind, PendingIntent};

/// Result of one sync pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncOutcome {
    pub conflicts_resolved: usize,
    pub intents_applied: usize,
    /// Failed this pass but requeued
    pub intents_failed: usize,
    /// Failed for the last time and discarded
    pub intents_dropped: usize,
    pub errors: Vec<IntentApplyError>,
}

impl SyncOutcome {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.intents_failed == 0 && self.intents_dropped == 0
    }

    #[must_use]
    pub fn intents_processed(&self) -> usize {
        self.intents_applied + self.intents_failed + self.intents_dropped
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The pass panicked; its whole batch stays queued for the next pass
    #[error("sync pass aborted: {0}")]
    Aborted(String),

    #[error("a sync pass is already in progress")]
    AlreadyInProgress,
}

/// Called with the cache's selections after every change
pub type CacheListener = dyn Fn(&[SelectionEntry]) + Send + Sync;

/// Selections and the intents that produced them. One lock covers both so
/// a rebase can never miss a write that landed between its two halves.
struct CacheState {
    selections: Vec<SelectionEntry>,
    queue: VecDeque<PendingIntent>,
}

impl CacheState {
    fn record(&mut self, kind: IntentKind) -> usize {
        kind.apply_local(&mut self.selections);
        self.queue.push_back(PendingIntent::new(kind));
        self.queue.len()
    }

    fn is_selected(&self, course_id: &str) -> bool {
        self.selections.iter().any(|e| e.course_id() == course_id)
    }

    fn rebase(&mut self, mut base: Vec<SelectionEntry>) {
        for intent in &self.queue {
            intent.kind.apply_local(&mut base);
        }
        self.selections = base;
    }
}

pub struct OptimisticCache {
    orchestrator: StateOrchestrator,
    state: Mutex<CacheState>,
    listeners: ListenerSet<CacheListener>,
    syncing: AtomicBool,
    max_retries: u32,
}

impl OptimisticCache {
    /// Cache seeded from the orchestrator's current selections
    pub fn new(orchestrator: StateOrchestrator, config: &SyncConfig) -> Self {
        let selections = orchestrator.selected_courses();
        Self {
            orchestrator,
            state: Mutex::new(CacheState {
                selections,
                queue: VecDeque::new(),
            }),
            listeners: ListenerSet::new(),
            syncing: AtomicBool::new(false),
            max_retries: config.max_intent_retries,
        }
    }

    #[must_use]
    pub fn orchestrator(&self) -> &StateOrchestrator {
        &self.orchestrator
    }

    // ─── Reads ──────────────────────────────────────────────────────────

    /// Current selections, with section references re-hydrated
    pub fn get_selections(&self) -> Vec<SelectionEntry> {
        let mut state = self.state.lock();
        crate::model::hydrate_all(&mut state.selections);
        state.selections.clone()
    }

    #[must_use]
    pub fn selection(&self, course_id: &str) -> Option<SelectionEntry> {
        let mut state = self.state.lock();
        let entry = state.selections.iter_mut().find(|e| e.course_id() == course_id)?;
        entry.hydrate();
        Some(entry.clone())
    }

    #[must_use]
    pub fn is_selected(&self, course_id: &str) -> bool {
        self.state.lock().is_selected(course_id)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().queue.len()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.state.lock().queue.is_empty()
    }

    #[must_use]
    pub fn pending_intents(&self) -> Vec<PendingIntent> {
        self.state.lock().queue.iter().cloned().collect()
    }

    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    // ─── Writes ─────────────────────────────────────────────────────────

    /// Select (or update `is_required` of) a course
    pub fn select_course(&self, course: &Course, is_required: bool) {
        let kind = IntentKind::SelectCourse {
            course: course.clone(),
            is_required,
        };
        self.mutate(kind, |_| true);
    }

    /// Returns false (and queues nothing) if the course was not selected.
    pub fn unselect_course(&self, course_id: &str) -> bool {
        let kind = IntentKind::UnselectCourse {
            course_id: course_id.to_string(),
        };
        self.mutate(kind, |state| state.is_selected(course_id))
    }

    /// Returns false (and queues nothing) if the course is not selected.
    pub fn set_selected_section(&self, course_id: &str, section_number: Option<&str>) -> bool {
        let kind = IntentKind::SetSection {
            course_id: course_id.to_string(),
            section_number: section_number.map(str::to_string),
        };
        let queued = self.mutate(kind, |state| state.is_selected(course_id));
        if !queued {
            debug!(course_id, "Ignoring section change for unselected course");
        }
        queued
    }

    /// No-op on an empty selection list
    pub fn clear_all_selections(&self) {
        self.mutate(IntentKind::ClearAll, |state| !state.selections.is_empty());
    }

    /// Apply and queue `kind` in one critical section when `applies` holds
    fn mutate(&self, kind: IntentKind, applies: impl FnOnce(&CacheState) -> bool) -> bool {
        let pending = {
            let mut state = self.state.lock();
            if !applies(&*state) {
                return false;
            }
            state.record(kind)
        };
        crate::metrics::set_pending_intents(pending);
        self.notify();
        true
    }

    // ─── Listeners ──────────────────────────────────────────────────────

    pub fn add_listener(&self, listener: impl Fn(&[SelectionEntry]) + Send + Sync + 'static) -> ListenerId {
        self.listeners.add(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn notify(&self) {
        let snapshot = self.state.lock().selections.clone();
        self.listeners.notify("cache", |listener| listener(&snapshot));
    }

    // ─── Reconciliation ─────────────────────────────────────────────────

    /// Rebase on the orchestrator's selections and replay pending intents.
    pub fn refresh_from_backend(&self) {
        {
            let mut state = self.state.lock();
            state.rebase(self.orchestrator.selected_courses());
        }
        self.notify();
    }

    /// Reconcile with the orchestrator and replay queued intents.
    ///
    /// Intents queued while the pass runs wait for the next pass.
    pub fn sync_with_backend(&self) -> Result<SyncOutcome, SyncError> {
        if self.syncing.swap(true, Ordering::AcqRel) {
            return Err(SyncError::AlreadyInProgress);
        }
        let started = Instant::now();

        let result = catch_unwind(AssertUnwindSafe(|| self.run_pass())).map_err(|panic| {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(reason = %reason, "Sync pass aborted");
            SyncError::Aborted(reason)
        });
        self.syncing.store(false, Ordering::Release);

        crate::metrics::record_sync_pass(result.is_ok(), started.elapsed());
        crate::metrics::set_pending_intents(self.pending_count());
        if let Ok(outcome) = &result {
            crate::metrics::record_intents(outcome.intents_applied, outcome.intents_failed, outcome.intents_dropped);
        }
        result
    }

    fn run_pass(&self) -> SyncOutcome {
        let mut outcome = SyncOutcome {
            conflicts_resolved: self.resolve_conflicts(),
            ..SyncOutcome::default()
        };

        // The batch stays queued until it is settled below, so a concurrent
        // rebase still replays it
        let batch: Vec<PendingIntent> = self.state.lock().queue.iter().cloned().collect();
        let batch_len = batch.len();
        let mut requeue = Vec::new();

        for mut intent in batch {
            match intent.kind.apply_to(&self.orchestrator) {
                Ok(()) => outcome.intents_applied += 1,
                Err(source) => {
                    intent.retry_count += 1;
                    let failure = IntentApplyError {
                        intent_id: intent.id.clone(),
                        kind: intent.kind.name(),
                        attempt: intent.retry_count,
                        source,
                    };
                    if intent.retry_count >= self.max_retries {
                        warn!(error = %failure, "Dropping intent after repeated failures");
                        outcome.intents_dropped += 1;
                    } else {
                        debug!(error = %failure, "Intent failed; requeueing");
                        outcome.intents_failed += 1;
                        requeue.push(intent);
                    }
                    outcome.errors.push(failure);
                }
            }
        }

        {
            // Only a pass removes from the front, so the batch is still there
            let mut state = self.state.lock();
            let settled = batch_len.min(state.queue.len());
            state.queue.drain(..settled);
            for intent in requeue.into_iter().rev() {
                state.queue.push_front(intent);
            }
            state.rebase(self.orchestrator.selected_courses());
        }
        self.notify();

        if outcome.intents_processed() > 0 || outcome.conflicts_resolved > 0 {
            info!(
                applied = outcome.intents_applied,
                failed = outcome.intents_failed,
                dropped = outcome.intents_dropped,
                conflicts = outcome.conflicts_resolved,
                "Sync pass complete"
            );
        }
        outcome
    }

    /// Push the cache's section choice wherever the two sides disagree
    fn resolve_conflicts(&self) -> usize {
        let local = self.state.lock().selections.clone();
        let mut resolved = 0;

        for entry in &local {
            let Some(remote) = self.orchestrator.selected_course(entry.course_id()) else {
                continue;
            };
            if remote.chosen_section_number == entry.chosen_section_number {
                continue;
            }
            debug!(
                course_id = entry.course_id(),
                cache = ?entry.chosen_section_number,
                backend = ?remote.chosen_section_number,
                "Section conflict; keeping cache value"
            );
            if self
                .orchestrator
                .set_selected_section(entry.course_id(), entry.chosen_section_number.as_deref(), ChangeSource::Cache)
                .is_ok()
            {
                resolved += 1;
            }
        }
        resolved
    }
}

#[async_trait]
impl SyncSource for OptimisticCache {
    fn has_pending(&self) -> bool {
        OptimisticCache::has_pending(self)
    }

    fn pending_count(&self) -> usize {
        OptimisticCache::pending_count(self)
    }

    async fn sync(&self) -> Result<SyncOutcome, SyncError> {
        self.sync_with_backend()
    }
}

impl std::fmt::Debug for OptimisticCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticCache")
            .field("selections", &self.state.lock().selections.len())
            .field("pending", &self.state.lock().queue.len())
            .field("syncing", &self.is_syncing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::tests::orchestrator;

    fn cache() -> OptimisticCache {
        OptimisticCache::new(orchestrator(), &SyncConfig::default())
    }

    fn course(id: &str) -> Course {
        Course::sample(id, &["AL01", "AL02"])
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_are_visible_immediately_and_queued() {
        let cache = cache();
        cache.select_course(&course("CS1101"), false);
        cache.set_selected_section("CS1101", Some("AL01"));

        let selections = cache.get_selections();
        assert_eq!(selections.len(), 1);
        assert_eq!(selections[0].chosen_section_number.as_deref(), Some("AL01"));
        assert_eq!(cache.pending_count(), 2);
        assert!(cache.orchestrator().selected_courses().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_noop_writes_are_not_queued() {
        let cache = cache();
        assert!(!cache.unselect_course("CS1101"));
        assert!(!cache.set_selected_section("CS1101", Some("AL01")));
        cache.clear_all_selections();
        assert_eq!(cache.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_applies_in_order() {
        let cache = cache();
        cache.select_course(&course("CS1101"), false);
        cache.set_selected_section("CS1101", Some("AL02"));
        cache.select_course(&course("MA1021"), true);
        cache.unselect_course("MA1021");

        let outcome = cache.sync_with_backend().unwrap();
        assert_eq!(outcome.intents_applied, 4);
        assert!(outcome.is_clean());
        assert!(!cache.has_pending());

        let backend = cache.orchestrator().selected_courses();
        assert_eq!(backend.len(), 1);
        assert_eq!(backend[0].chosen_section_number.as_deref(), Some("AL02"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_intent_requeued_then_dropped() {
        let cache = cache();
        cache.select_course(&Course::sample("ZZ0000", &["X01"]), false);
        cache.select_course(&course("CS2102"), false);

        let first = cache.sync_with_backend().unwrap();
        assert_eq!(first.intents_applied, 1);
        assert_eq!(first.intents_failed, 1);
        let queued = cache.pending_intents();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].retry_count, 1);
        // Still visible locally while it retries
        assert!(cache.is_selected("ZZ0000"));

        cache.sync_with_backend().unwrap();
        let last = cache.sync_with_backend().unwrap();
        assert_eq!(last.intents_dropped, 1);
        assert!(!cache.has_pending());
        assert!(!cache.is_selected("ZZ0000"));
        assert!(cache.is_selected("CS2102"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeued_intents_precede_newer_ones() {
        let cache = cache();
        cache.select_course(&Course::sample("ZZ0000", &[]), false);
        cache.sync_with_backend().unwrap();

        cache.select_course(&course("CS1101"), false);
        let kinds: Vec<_> = cache.pending_intents().iter().map(|i| i.kind.course_id().map(str::to_string)).collect();
        assert_eq!(kinds, vec![Some("ZZ0000".to_string()), Some("CS1101".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_resolved_in_favour_of_cache() {
        let cache = cache();
        cache.select_course(&course("CS1101"), false);
        cache.set_selected_section("CS1101", Some("AL01"));
        cache.sync_with_backend().unwrap();

        cache
            .orchestrator()
            .set_selected_section("CS1101", Some("AL02"), ChangeSource::System)
            .unwrap();

        let outcome = cache.sync_with_backend().unwrap();
        assert_eq!(outcome.conflicts_resolved, 1);
        let backend = cache.orchestrator().selected_course("CS1101").unwrap();
        assert_eq!(backend.chosen_section_number.as_deref(), Some("AL01"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_replays_pending_on_new_base() {
        let cache = cache();
        cache
            .orchestrator()
            .select_course("MA1021", false, ChangeSource::System)
            .unwrap();
        cache.select_course(&course("CS1101"), true);

        cache.refresh_from_backend();
        let ids: Vec<_> = cache.get_selections().iter().map(|e| e.course_id().to_string()).collect();
        assert_eq!(ids, vec!["MA1021", "CS1101"]);
        assert_eq!(cache.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_rehydrate_sections() {
        let cache = cache();
        cache.select_course(&course("CS1101"), false);
        cache.set_selected_section("CS1101", Some("AL02"));
        cache.state.lock().selections[0].chosen_section = None;

        let entry = cache.selection("CS1101").unwrap();
        assert!(entry.is_consistent());
        assert!(entry.chosen_section.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_writes_survive_concurrent_rebase() {
        let cache = Arc::new(cache());
        let stop = Arc::new(AtomicBool::new(false));

        let refresher = {
            let cache = cache.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    cache.refresh_from_backend();
                }
            })
        };

        let mut lost = 0;
        for i in 0..1000 {
            let id = format!("CS{i:04}");
            cache.select_course(&course(&id), false);
            if !cache.is_selected(&id) {
                lost += 1;
            }
        }
        stop.store(true, Ordering::Relaxed);
        refresher.join().unwrap();

        assert_eq!(lost, 0);
        assert_eq!(cache.get_selections().len(), 1000);
        assert_eq!(cache.pending_count(), 1000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_writes_during_pass_stay_visible() {
        let cache = Arc::new(cache());
        let stop = Arc::new(AtomicBool::new(false));

        let syncer = {
            let cache = cache.clone();
            let stop = stop.clone();
            let handle = tokio::runtime::Handle::current();
            std::thread::spawn(move || {
                let _runtime = handle.enter();
                while !stop.load(Ordering::Relaxed) {
                    cache.sync_with_backend().unwrap();
                }
            })
        };

        let ids = ["CS1101", "CS2102", "MA1021"];
        for i in 0..600 {
            let id = ids[i % ids.len()];
            if cache.is_selected(id) {
                assert!(cache.unselect_course(id));
                assert!(!cache.is_selected(id), "{id} still selected after unselect");
            } else {
                cache.select_course(&course(id), false);
                assert!(cache.is_selected(id), "{id} missing after select");
            }
        }
        stop.store(true, Ordering::Relaxed);
        syncer.join().unwrap();

        let ids_of = |entries: Vec<SelectionEntry>| entries.iter().map(|e| e.course_id().to_string()).collect::<Vec<_>>();
        let expected = ids_of(cache.get_selections());
        cache.sync_with_backend().unwrap();
        assert!(!cache.has_pending());
        assert_eq!(ids_of(cache.orchestrator().selected_courses()), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_notified_and_isolated() {
        let cache = cache();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        cache.add_listener(|_| panic!("listener failure"));
        cache.add_listener(move |entries| s.lock().push(entries.len()));

        cache.select_course(&course("CS1101"), false);
        cache.clear_all_selections();
        assert_eq!(*seen.lock(), vec![1, 0]);
    }
}
