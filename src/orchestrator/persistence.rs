// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable flush, load, export/import and health for the orchestrator.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{
    ChangeSource, EventKind, LoadReport, OrchestratorHealth, ProfileState, ScheduleAction, StateEvent,
    StateOrchestrator,
};
use crate::durable::{ImportSummary, LoadResult, StoreError, TransactionResult, WriteOp};
use crate::model::{hydrate_all, Schedule};

const DEFAULT_SCHEDULE_NAME: &str = "My Schedule";

impl StateOrchestrator {
    /// Restart the debounce timer for the next flush
    pub(super) fn schedule_save(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.save_timer.schedule(self.inner.config.debounce(), async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let orchestrator = StateOrchestrator { inner };
            if orchestrator.is_loading() {
                debug!("Skipping debounced save while loading");
                return;
            }
            orchestrator.save().await;
        });
    }

    /// Whether a debounced flush is waiting to fire
    #[must_use]
    pub fn save_pending(&self) -> bool {
        self.inner.save_timer.is_pending()
    }

    /// Flush the whole state to the store in one transaction.
    ///
    /// On failure the state stays dirty and is retried by the next flush.
    #[tracing::instrument(skip(self))]
    pub async fn save(&self) -> TransactionResult {
        self.inner.save_timer.cancel();

        let (ops, revision) = {
            let state = self.inner.state.lock();
            let ops = vec![
                WriteOp::ActiveScheduleId(state.active_schedule_id.clone()),
                WriteOp::Schedules(state.schedules.clone()),
                WriteOp::SelectedCourses(state.selected_courses.clone()),
                WriteOp::Preferences(state.preferences.clone()),
                WriteOp::Theme(state.preferences.theme.clone()),
            ];
            (ops, state.revision)
        };

        let result = self.inner.store.execute_transaction(ops).await;

        if result.success {
            let cleaned = {
                let mut state = self.inner.state.lock();
                state.last_saved = Some(Utc::now());
                let cleaned = state.has_unsaved_changes && state.revision == revision;
                if cleaned {
                    state.has_unsaved_changes = false;
                }
                cleaned
            };
            if cleaned {
                crate::metrics::set_dirty(false);
                self.enqueue_events(vec![StateEvent::new(
                    EventKind::SaveStateChanged { has_unsaved_changes: false },
                    ChangeSource::System,
                )]);
            }
            debug!(transaction_id = %result.transaction_id, "State saved");
        } else {
            warn!(
                transaction_id = %result.transaction_id,
                error = ?result.error,
                attempts = result.attempts,
                "Save failed; state remains dirty"
            );
        }
        result
    }

    /// Replace the in-memory state with what the store holds.
    ///
    /// Loads preferences, schedules, the active id, then selections (the
    /// active schedule's list, else the standalone snapshot). Every part is
    /// validated. A missing schedule list gets a default schedule and a
    /// missing or dangling active id is pointed at the first schedule; such
    /// repairs leave the state dirty so the next flush persists them.
    pub fn load_from_storage(&self) -> LoadReport {
        self.inner.state.lock().is_loading = true;

        let store = &self.inner.store;
        let validator = store.validator();
        let mut report = LoadReport {
            all_slots_valid: true,
            ..LoadReport::default()
        };

        let mut preferences = take(store.load_preferences(), "preferences", &mut report);
        let mut schedules = take(store.load_schedules(), "schedules", &mut report);
        let active_id = take(store.load_active_schedule_id(), "active schedule id", &mut report);
        let snapshot = take(store.load_selected_courses(), "selected courses", &mut report);

        let mut validation = validator.validate_preferences(&mut preferences);
        validation.merge(validator.validate_schedules(&mut schedules));
        let mut repaired = !validation.is_clean();

        if schedules.is_empty() {
            info!("No schedules stored; creating default schedule");
            schedules.push(Schedule::new(DEFAULT_SCHEDULE_NAME, snapshot.clone()));
            report.created_default_schedule = true;
            repaired = true;
        }

        let active_id = match active_id.filter(|id| schedules.iter().any(|s| s.id == *id)) {
            Some(id) => id,
            None => {
                if !report.created_default_schedule {
                    report.issues.push("active schedule missing; promoted first schedule".into());
                }
                repaired = true;
                schedules[0].id.clone()
            }
        };

        let mut selections = schedules
            .iter()
            .find(|s| s.id == active_id)
            .map(|s| s.selected_courses.clone())
            .unwrap_or(snapshot);
        validation.merge(validator.validate_selections(&mut selections));
        hydrate_all(&mut selections);
        report.issues.extend(validation.issues);

        let dirty_edge = {
            let mut state = self.inner.state.lock();
            let previous = std::mem::take(&mut *state);
            *state = ProfileState {
                active_schedule_id: Some(active_id),
                schedules,
                selected_courses: selections,
                preferences,
                has_unsaved_changes: repaired,
                last_saved: previous.last_saved,
                is_loading: false,
                revision: previous.revision + 1,
            };
            (repaired != previous.has_unsaved_changes).then_some(repaired)
        };

        crate::metrics::set_dirty(repaired);
        let status = if report.all_slots_valid { "success" } else { "degraded" };
        crate::metrics::record_operation("orchestrator", "load", status);
        info!(
            valid = report.all_slots_valid,
            created_default = report.created_default_schedule,
            issues = report.issues.len(),
            "State loaded from storage"
        );

        if let Some(has_unsaved_changes) = dirty_edge {
            self.enqueue_events(vec![StateEvent::new(
                EventKind::SaveStateChanged { has_unsaved_changes },
                ChangeSource::System,
            )]);
        }
        if repaired {
            self.schedule_save();
        } else {
            self.inner.save_timer.cancel();
        }
        report
    }

    /// Flush pending changes, then export the durable state.
    pub async fn export_data(&self) -> Result<String, StoreError> {
        if self.has_unsaved_changes() {
            let result = self.save().await;
            if !result.success {
                return Err(result
                    .error
                    .unwrap_or_else(|| StoreError::Integrity("flush before export failed".into())));
            }
        }
        self.inner.store.export_data()
    }

    /// Import an export document and reload from it. Unsaved in-memory
    /// changes are discarded.
    pub fn import_data(&self, text: &str) -> Result<ImportSummary, StoreError> {
        let summary = self.inner.store.import_data(text)?;
        self.inner.save_timer.cancel();

        self.load_from_storage();
        self.enqueue_events(vec![StateEvent::new(
            EventKind::ScheduleChanged {
                schedule_id: None,
                action: ScheduleAction::Imported,
            },
            ChangeSource::System,
        )]);
        info!(
            transaction_id = %summary.transaction_id,
            schedules = summary.schedules,
            "Import applied"
        );
        Ok(summary)
    }

    /// Store health plus in-memory consistency checks
    pub async fn health(&self) -> OrchestratorHealth {
        let store = self.inner.store.health().await;

        let mut issues = store.issues.clone();
        {
            let state = self.inner.state.lock();
            if let Some(id) = &state.active_schedule_id {
                if state.active_schedule().is_none() {
                    issues.push(format!("Active schedule ID references non-existent schedule: {id}"));
                }
            }
            if state.selected_courses.iter().any(|e| !e.is_consistent()) {
                issues.push("selection with inconsistent section reference".into());
            }
        }

        OrchestratorHealth {
            healthy: store.healthy && issues.is_empty(),
            issues,
            store,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&mut ProfileState) -> T) -> T {
        f(&mut self.inner.state.lock())
    }
}

fn take<T>(result: LoadResult<T>, what: &str, report: &mut LoadReport) -> T {
    if !result.valid {
        report.all_slots_valid = false;
        let reason = result.error.map(|e| e.to_string()).unwrap_or_default();
        warn!(slot = what, reason = %reason, "Falling back to default");
        report.issues.push(format!("{what} unreadable: {reason}"));
    }
    result.data
}
