// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Authoritative planner state.
//!
//! Every mutation funnels through one choke point that:
//!
//! 1. applies the change under the state lock,
//! 2. marks the state dirty (emitting `SaveStateChanged` on the clean to
//!    dirty edge),
//! 3. restarts the debounce timer for the next durable flush,
//! 4. queues the change events for asynchronous FIFO delivery.
//!
//! A call that changes nothing emits nothing and leaves the dirty flag
//! alone. Persistence failures never undo a mutation; they leave the state
//! dirty for the next flush.
//!
//! Mutations spawn timer and delivery tasks, so they must run inside a
//! Tokio runtime.

pub mod events;
pub mod persistence;
pub mod types;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::catalog::CourseCatalog;
use crate::config::SyncConfig;
use crate::durable::DurableStore;
use crate::listeners::{ListenerId, ListenerSet};
use crate::model::{
    hydrate_all, Preferences, PreferencesUpdate, Schedule, ScheduleUpdate, SelectionEntry,
};
use crate::timer::DelayedTask;

use events::EventQueue;
pub use types::{
    ChangeSource, CourseChange, EventKind, LoadReport, OrchestratorHealth, ProfileState,
    ScheduleAction, StateError, StateEvent, StateListener,
};

pub(crate) struct Inner {
    state: Mutex<ProfileState>,
    store: Arc<DurableStore>,
    catalog: Arc<dyn CourseCatalog>,
    config: SyncConfig,
    save_timer: DelayedTask,
    events: Mutex<EventQueue>,
    idle: Notify,
    listeners: ListenerSet<StateListener>,
}

/// Shared handle to the authoritative state. Clones share the same state.
#[derive(Clone)]
pub struct StateOrchestrator {
    inner: Arc<Inner>,
}

impl StateOrchestrator {
    pub fn new(store: Arc<DurableStore>, catalog: Arc<dyn CourseCatalog>, config: &SyncConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ProfileState::default()),
                store,
                catalog,
                config: config.clone(),
                save_timer: DelayedTask::new("orchestrator_save"),
                events: Mutex::new(EventQueue::default()),
                idle: Notify::new(),
                listeners: ListenerSet::new(),
            }),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<DurableStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn CourseCatalog> {
        &self.inner.catalog
    }

    // ─── Reads ──────────────────────────────────────────────────────────

    /// Snapshot of the whole state
    #[must_use]
    pub fn state(&self) -> ProfileState {
        self.inner.state.lock().clone()
    }

    #[must_use]
    pub fn active_schedule(&self) -> Option<Schedule> {
        self.inner.state.lock().active_schedule().cloned()
    }

    #[must_use]
    pub fn active_schedule_id(&self) -> Option<String> {
        self.inner.state.lock().active_schedule_id.clone()
    }

    #[must_use]
    pub fn schedules(&self) -> Vec<Schedule> {
        self.inner.state.lock().schedules.clone()
    }

    #[must_use]
    pub fn selected_courses(&self) -> Vec<SelectionEntry> {
        self.inner.state.lock().selected_courses.clone()
    }

    #[must_use]
    pub fn selected_course(&self, course_id: &str) -> Option<SelectionEntry> {
        self.inner.state.lock().selection(course_id).cloned()
    }

    #[must_use]
    pub fn preferences(&self) -> Preferences {
        self.inner.state.lock().preferences.clone()
    }

    #[must_use]
    pub fn has_unsaved_changes(&self) -> bool {
        self.inner.state.lock().has_unsaved_changes
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().is_loading
    }

    // ─── Course mutations ───────────────────────────────────────────────

    /// Select a course by id, or update `is_required` if already selected.
    pub fn select_course(&self, course_id: &str, is_required: bool, source: ChangeSource) -> Result<(), StateError> {
        let course = self
            .inner
            .catalog
            .course(course_id)
            .ok_or_else(|| StateError::UnknownCourse(course_id.to_string()))?;

        self.with_state_update(source, |state, events| {
            match state.selected_courses.iter_mut().find(|e| e.course_id() == course_id) {
                Some(existing) => existing.is_required = is_required,
                None => state.selected_courses.push(SelectionEntry::new(course, is_required)),
            }
            state.mirror_into_active();
            events.push(EventKind::CoursesChanged(CourseChange::Selected {
                course_id: course_id.to_string(),
                is_required,
            }));
        });
        Ok(())
    }

    /// Returns false if the course was not selected.
    pub fn unselect_course(&self, course_id: &str, source: ChangeSource) -> bool {
        self.with_state_update(source, |state, events| {
            let before = state.selected_courses.len();
            state.selected_courses.retain(|e| e.course_id() != course_id);
            if state.selected_courses.len() == before {
                return false;
            }
            state.mirror_into_active();
            events.push(EventKind::CoursesChanged(CourseChange::Unselected {
                course_id: course_id.to_string(),
            }));
            true
        })
    }

    /// Choose (or clear with `None`) a section for a selected course.
    ///
    /// The section is resolved from the course's own list; an unknown or
    /// incomplete section clears the choice. Returns whether a section is
    /// chosen afterwards.
    pub fn set_selected_section(
        &self,
        course_id: &str,
        section_number: Option<&str>,
        source: ChangeSource,
    ) -> Result<bool, StateError> {
        self.with_state_update(source, |state, events| {
            let entry = state
                .selected_courses
                .iter_mut()
                .find(|e| e.course_id() == course_id)
                .ok_or_else(|| StateError::NotSelected(course_id.to_string()))?;

            let chosen = entry.choose_section(section_number);
            if !chosen && section_number.is_some() {
                warn!(course_id, section = ?section_number, "Section not found or incomplete; clearing choice");
            }
            let resolved = entry.chosen_section_number.clone();
            state.mirror_into_active();
            events.push(EventKind::CoursesChanged(CourseChange::SectionChanged {
                course_id: course_id.to_string(),
                section_number: resolved,
            }));
            Ok(chosen)
        })
    }

    pub fn clear_all_selections(&self, source: ChangeSource) {
        self.with_state_update(source, |state, events| {
            state.selected_courses.clear();
            state.mirror_into_active();
            events.push(EventKind::CoursesChanged(CourseChange::Cleared));
        });
    }

    // ─── Schedule mutations ─────────────────────────────────────────────

    /// New schedule holding a copy of the current selections
    pub fn create_schedule(&self, name: &str, source: ChangeSource) -> Schedule {
        self.with_state_update(source, |state, events| {
            let schedule = Schedule::new(name, state.selected_courses.clone());
            state.schedules.push(schedule.clone());
            events.push(EventKind::ScheduleChanged {
                schedule_id: Some(schedule.id.clone()),
                action: ScheduleAction::Created,
            });
            schedule
        })
    }

    /// Make `schedule_id` active and swap in its selections.
    pub fn set_active_schedule(&self, schedule_id: &str, source: ChangeSource) -> bool {
        self.with_state_update(source, |state, events| {
            let Some(schedule) = state.schedules.iter().find(|s| s.id == schedule_id) else {
                return false;
            };

            state.is_loading = true;
            let mut selections = schedule.selected_courses.clone();
            hydrate_all(&mut selections);
            state.selected_courses = selections;
            state.active_schedule_id = Some(schedule_id.to_string());
            state.mirror_into_active();
            state.is_loading = false;

            events.push(EventKind::ActiveScheduleChanged {
                schedule_id: schedule_id.to_string(),
            });
            events.push(EventKind::CoursesChanged(CourseChange::LoadedFromSchedule {
                schedule_id: schedule_id.to_string(),
            }));
            true
        })
    }

    /// Apply a partial update. Updating the active schedule's course list
    /// also replaces the current selections.
    pub fn update_schedule(&self, schedule_id: &str, update: ScheduleUpdate, source: ChangeSource) -> bool {
        self.with_state_update(source, |state, events| {
            let is_active = state.active_schedule_id.as_deref() == Some(schedule_id);
            let Some(schedule) = state.schedules.iter_mut().find(|s| s.id == schedule_id) else {
                return false;
            };

            if let Some(name) = update.name {
                schedule.name = name;
            }
            if let Some(mut courses) = update.selected_courses {
                hydrate_all(&mut courses);
                schedule.selected_courses = courses;
            }
            if let Some(generated) = update.generated_schedules {
                schedule.generated_schedules = generated;
            }

            if is_active {
                state.selected_courses = schedule.selected_courses.clone();
                events.push(EventKind::ActiveScheduleChanged {
                    schedule_id: schedule_id.to_string(),
                });
            }
            events.push(EventKind::ScheduleChanged {
                schedule_id: Some(schedule_id.to_string()),
                action: ScheduleAction::Updated,
            });
            true
        })
    }

    pub fn rename_schedule(&self, schedule_id: &str, name: &str, source: ChangeSource) -> bool {
        self.update_schedule(
            schedule_id,
            ScheduleUpdate {
                name: Some(name.to_string()),
                ..ScheduleUpdate::default()
            },
            source,
        )
    }

    /// Delete a schedule. Refused (false) for an unknown id or when it is
    /// the last schedule. Deleting the active schedule promotes the first
    /// remaining one.
    pub fn delete_schedule(&self, schedule_id: &str, source: ChangeSource) -> bool {
        self.with_state_update(source, |state, events| {
            let Some(index) = state.schedules.iter().position(|s| s.id == schedule_id) else {
                return false;
            };
            if state.schedules.len() <= 1 {
                debug!(schedule_id, "Refusing to delete the only schedule");
                return false;
            }

            state.schedules.remove(index);

            if state.active_schedule_id.as_deref() == Some(schedule_id) {
                let next = &state.schedules[0];
                let next_id = next.id.clone();
                let mut selections = next.selected_courses.clone();
                hydrate_all(&mut selections);
                state.active_schedule_id = Some(next_id.clone());
                state.selected_courses = selections;
                events.push(EventKind::ActiveScheduleChanged { schedule_id: next_id });
            }

            events.push(EventKind::ScheduleChanged {
                schedule_id: Some(schedule_id.to_string()),
                action: ScheduleAction::Deleted,
            });
            true
        })
    }

    pub fn duplicate_schedule(&self, schedule_id: &str, name: &str, source: ChangeSource) -> Option<Schedule> {
        self.with_state_update(source, |state, events| {
            let original = state.schedules.iter().find(|s| s.id == schedule_id)?;
            let mut copy = Schedule::new(name, original.selected_courses.clone());
            copy.generated_schedules = original.generated_schedules.clone();
            state.schedules.push(copy.clone());
            events.push(EventKind::ScheduleChanged {
                schedule_id: Some(copy.id.clone()),
                action: ScheduleAction::Duplicated,
            });
            Some(copy)
        })
    }

    // ─── Preferences ────────────────────────────────────────────────────

    pub fn update_preferences(&self, update: PreferencesUpdate, source: ChangeSource) {
        self.with_state_update(source, |state, events| {
            state.preferences.apply(update);
            events.push(EventKind::PreferencesChanged);
        });
    }

    // ─── Listeners ──────────────────────────────────────────────────────

    pub fn add_listener(&self, listener: impl Fn(&StateEvent, &ProfileState) + Send + Sync + 'static) -> ListenerId {
        self.inner.listeners.add(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn remove_all_listeners(&self) {
        self.inner.listeners.clear();
    }

    // ─── Choke point ────────────────────────────────────────────────────

    /// Apply `update`; if it pushed any event, treat the state as changed.
    fn with_state_update<T>(
        &self,
        source: ChangeSource,
        update: impl FnOnce(&mut ProfileState, &mut Vec<EventKind>) -> T,
    ) -> T {
        let mut kinds = Vec::new();
        let (result, became_dirty) = {
            let mut state = self.inner.state.lock();
            let result = update(&mut state, &mut kinds);
            if kinds.is_empty() {
                return result;
            }
            let became_dirty = !state.has_unsaved_changes;
            state.has_unsaved_changes = true;
            state.revision += 1;
            (result, became_dirty)
        };

        crate::metrics::set_dirty(true);
        crate::metrics::record_operation("orchestrator", "mutation", "success");

        let mut queued = Vec::with_capacity(kinds.len() + 1);
        if became_dirty {
            queued.push(StateEvent::new(
                EventKind::SaveStateChanged { has_unsaved_changes: true },
                ChangeSource::System,
            ));
        }
        queued.extend(kinds.into_iter().map(|kind| StateEvent::new(kind, source)));

        self.schedule_save();
        self.enqueue_events(queued);
        result
    }
}

impl std::fmt::Debug for StateOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("StateOrchestrator")
            .field("active_schedule_id", &state.active_schedule_id)
            .field("schedules", &state.schedules.len())
            .field("selected_courses", &state.selected_courses.len())
            .field("has_unsaved_changes", &state.has_unsaved_changes)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::model::Course;
    use crate::storage::InMemoryMedium;

    pub(crate) fn catalog() -> Arc<InMemoryCatalog> {
        Arc::new(
            [
                Course::sample("CS1101", &["AL01", "AL02"]),
                Course::sample("CS2102", &["BL01"]),
                Course::sample("MA1021", &["A01", "A02", "A03"]),
            ]
            .into_iter()
            .collect(),
        )
    }

    pub(crate) fn orchestrator() -> StateOrchestrator {
        let store = Arc::new(DurableStore::new(Arc::new(InMemoryMedium::new()), &SyncConfig::default()));
        let orchestrator = StateOrchestrator::new(store, catalog(), &SyncConfig::default());
        orchestrator.load_from_storage();
        orchestrator
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_mirrors_into_active_schedule() {
        let o = orchestrator();
        o.select_course("CS1101", true, ChangeSource::User).unwrap();

        let active = o.active_schedule().unwrap();
        assert_eq!(active.name, "My Schedule");
        assert_eq!(active.selected_courses.len(), 1);
        assert!(active.selected_courses[0].is_required);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_unknown_course_is_error() {
        let o = orchestrator();
        let err = o.select_course("XX9999", false, ChangeSource::User).unwrap_err();
        assert_eq!(err, StateError::UnknownCourse("XX9999".into()));
        assert!(o.selected_courses().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reselect_updates_required_flag_only() {
        let o = orchestrator();
        o.select_course("CS1101", false, ChangeSource::User).unwrap();
        o.set_selected_section("CS1101", Some("AL02"), ChangeSource::User).unwrap();
        o.select_course("CS1101", true, ChangeSource::User).unwrap();

        let entry = o.selected_course("CS1101").unwrap();
        assert!(entry.is_required);
        assert_eq!(entry.chosen_section_number.as_deref(), Some("AL02"));
        assert_eq!(o.selected_courses().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_section_resolves_or_clears() {
        let o = orchestrator();
        o.select_course("MA1021", false, ChangeSource::User).unwrap();

        assert!(o.set_selected_section("MA1021", Some("A03"), ChangeSource::User).unwrap());
        assert!(o.selected_course("MA1021").unwrap().is_consistent());

        assert!(!o.set_selected_section("MA1021", Some("Z01"), ChangeSource::User).unwrap());
        assert!(o.selected_course("MA1021").unwrap().chosen_section_number.is_none());

        let err = o.set_selected_section("CS2102", Some("BL01"), ChangeSource::User).unwrap_err();
        assert_eq!(err, StateError::NotSelected("CS2102".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unselect_absent_is_noop() {
        let o = orchestrator();
        o.save().await;
        assert!(!o.has_unsaved_changes());

        assert!(!o.unselect_course("CS1101", ChangeSource::User));
        assert!(!o.has_unsaved_changes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_only_schedule_refused() {
        let o = orchestrator();
        let only = o.active_schedule_id().unwrap();

        assert!(!o.delete_schedule(&only, ChangeSource::User));
        assert_eq!(o.schedules().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_active_promotes_first_remaining() {
        let o = orchestrator();
        let first = o.active_schedule_id().unwrap();
        o.select_course("CS1101", false, ChangeSource::User).unwrap();

        let second = o.create_schedule("Spring", ChangeSource::User);
        assert!(o.set_active_schedule(&second.id, ChangeSource::User));
        o.select_course("MA1021", false, ChangeSource::User).unwrap();
        assert_eq!(o.selected_courses().len(), 2);

        assert!(o.delete_schedule(&second.id, ChangeSource::User));
        assert_eq!(o.active_schedule_id(), Some(first));
        let ids: Vec<_> = o.selected_courses().iter().map(|e| e.course_id().to_string()).collect();
        assert_eq!(ids, vec!["CS1101"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_active_schedule_swaps_and_hydrates() {
        let o = orchestrator();
        o.select_course("CS1101", false, ChangeSource::User).unwrap();
        o.set_selected_section("CS1101", Some("AL01"), ChangeSource::User).unwrap();
        let first = o.active_schedule_id().unwrap();

        let mut stripped = o.active_schedule().unwrap().selected_courses;
        stripped[0].chosen_section = None;
        let other = o.create_schedule("Other", ChangeSource::User);
        assert!(o.update_schedule(
            &other.id,
            ScheduleUpdate {
                selected_courses: Some(stripped),
                ..ScheduleUpdate::default()
            },
            ChangeSource::User,
        ));

        assert!(o.set_active_schedule(&other.id, ChangeSource::User));
        assert!(!o.is_loading());
        let entry = o.selected_course("CS1101").unwrap();
        assert!(entry.chosen_section.is_some());

        assert!(!o.set_active_schedule("schedule_missing", ChangeSource::User));
        assert!(o.set_active_schedule(&first, ChangeSource::User));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_and_rename() {
        let o = orchestrator();
        o.select_course("CS2102", false, ChangeSource::User).unwrap();
        let original = o.active_schedule_id().unwrap();

        let copy = o.duplicate_schedule(&original, "Copy", ChangeSource::User).unwrap();
        assert_ne!(copy.id, original);
        assert_eq!(copy.selected_courses.len(), 1);
        assert!(o.duplicate_schedule("nope", "x", ChangeSource::User).is_none());

        assert!(o.rename_schedule(&copy.id, "Renamed", ChangeSource::User));
        assert_eq!(o.schedules()[1].name, "Renamed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_preferences() {
        let o = orchestrator();
        o.update_preferences(
            PreferencesUpdate {
                avoid_back_to_back_classes: Some(true),
                theme: Some("dark".into()),
                ..PreferencesUpdate::default()
            },
            ChangeSource::User,
        );

        let prefs = o.preferences();
        assert!(prefs.avoid_back_to_back_classes);
        assert_eq!(prefs.theme, "dark");
        assert!(o.has_unsaved_changes());
    }
}
