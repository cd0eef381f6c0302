// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::durable::StoreHealth;
use crate::model::{Preferences, Schedule, SelectionEntry};

/// Authoritative planner state
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProfileState {
    pub active_schedule_id: Option<String>,
    pub schedules: Vec<Schedule>,
    pub selected_courses: Vec<SelectionEntry>,
    pub preferences: Preferences,
    pub has_unsaved_changes: bool,
    pub last_saved: Option<DateTime<Utc>>,
    pub is_loading: bool,
    /// Bumped on every mutation; a save only clears the dirty flag if no
    /// mutation happened while it was in flight.
    pub(crate) revision: u64,
}

impl ProfileState {
    #[must_use]
    pub fn active_schedule(&self) -> Option<&Schedule> {
        let id = self.active_schedule_id.as_deref()?;
        self.schedules.iter().find(|s| s.id == id)
    }

    #[must_use]
    pub fn selection(&self, course_id: &str) -> Option<&SelectionEntry> {
        self.selected_courses.iter().find(|e| e.course_id() == course_id)
    }

    /// Copy the selection list into the active schedule
    pub(crate) fn mirror_into_active(&mut self) {
        let Some(id) = self.active_schedule_id.clone() else {
            return;
        };
        if let Some(schedule) = self.schedules.iter_mut().find(|s| s.id == id) {
            schedule.selected_courses = self.selected_courses.clone();
        }
    }
}

/// Who caused a change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    User,
    /// Replayed or reconciled by the optimistic cache
    Cache,
    System,
}

impl fmt::Display for ChangeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Cache => write!(f, "cache"),
            Self::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CourseChange {
    Selected { course_id: String, is_required: bool },
    Unselected { course_id: String },
    SectionChanged { course_id: String, section_number: Option<String> },
    Cleared,
    LoadedFromSchedule { schedule_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleAction {
    Created,
    Updated,
    Deleted,
    Duplicated,
    Imported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    CoursesChanged(CourseChange),
    ScheduleChanged {
        schedule_id: Option<String>,
        action: ScheduleAction,
    },
    PreferencesChanged,
    ActiveScheduleChanged { schedule_id: String },
    SaveStateChanged { has_unsaved_changes: bool },
}

/// A queued state change notification
#[derive(Debug, Clone, PartialEq)]
pub struct StateEvent {
    pub kind: EventKind,
    pub source: ChangeSource,
    pub timestamp: DateTime<Utc>,
}

impl StateEvent {
    pub(crate) fn new(kind: EventKind, source: ChangeSource) -> Self {
        Self {
            kind,
            source,
            timestamp: Utc::now(),
        }
    }
}

/// Listener signature: the event plus a snapshot of the state at delivery
pub type StateListener = dyn Fn(&StateEvent, &ProfileState) + Send + Sync;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("unknown course '{0}'")]
    UnknownCourse(String),

    #[error("unknown schedule '{0}'")]
    UnknownSchedule(String),

    #[error("course '{0}' is not selected")]
    NotSelected(String),
}

/// Outcome of [`StateOrchestrator::load_from_storage`](super::StateOrchestrator::load_from_storage)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadReport {
    /// False if any slot fell back to its default
    pub all_slots_valid: bool,
    pub created_default_schedule: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorHealth {
    pub healthy: bool,
    pub issues: Vec<String>,
    pub store: StoreHealth,
}
