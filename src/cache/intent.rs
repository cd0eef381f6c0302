// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queued user intents and their per-kind application logic.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{Course, SelectionEntry};
use crate::orchestrator::{ChangeSource, StateError, StateOrchestrator};

/// What the user asked for
#[derive(Debug, Clone, PartialEq)]
pub enum IntentKind {
    SelectCourse { course: Course, is_required: bool },
    UnselectCourse { course_id: String },
    SetSection { course_id: String, section_number: Option<String> },
    ClearAll,
}

impl IntentKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SelectCourse { .. } => "select_course",
            Self::UnselectCourse { .. } => "unselect_course",
            Self::SetSection { .. } => "set_section",
            Self::ClearAll => "clear_all",
        }
    }

    /// Course the intent targets, if any
    #[must_use]
    pub fn course_id(&self) -> Option<&str> {
        match self {
            Self::SelectCourse { course, .. } => Some(&course.id),
            Self::UnselectCourse { course_id } | Self::SetSection { course_id, .. } => Some(course_id),
            Self::ClearAll => None,
        }
    }

    /// Apply to a local selection list. Never fails: operations on absent
    /// courses are no-ops.
    pub(crate) fn apply_local(&self, entries: &mut Vec<SelectionEntry>) {
        match self {
            Self::SelectCourse { course, is_required } => {
                match entries.iter_mut().find(|e| e.course_id() == course.id) {
                    Some(existing) => existing.is_required = *is_required,
                    None => entries.push(SelectionEntry::new(course.clone(), *is_required)),
                }
            }
            Self::UnselectCourse { course_id } => entries.retain(|e| e.course_id() != course_id),
            Self::SetSection { course_id, section_number } => {
                if let Some(entry) = entries.iter_mut().find(|e| e.course_id() == course_id) {
                    entry.choose_section(section_number.as_deref());
                }
            }
            Self::ClearAll => entries.clear(),
        }
    }

    /// Apply to the authoritative state
    pub(crate) fn apply_to(&self, orchestrator: &StateOrchestrator) -> Result<(), StateError> {
        match self {
            Self::SelectCourse { course, is_required } => {
                orchestrator.select_course(&course.id, *is_required, ChangeSource::Cache)
            }
            Self::UnselectCourse { course_id } => {
                orchestrator.unselect_course(course_id, ChangeSource::Cache);
                Ok(())
            }
            Self::SetSection { course_id, section_number } => orchestrator
                .set_selected_section(course_id, section_number.as_deref(), ChangeSource::Cache)
                .map(|_| ()),
            Self::ClearAll => {
                orchestrator.clear_all_selections(ChangeSource::Cache);
                Ok(())
            }
        }
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.course_id() {
            Some(id) => write!(f, "{}({id})", self.name()),
            None => f.write_str(self.name()),
        }
    }
}

/// An intent waiting to be replayed into the authoritative state
#[derive(Debug, Clone, PartialEq)]
pub struct PendingIntent {
    pub id: String,
    pub kind: IntentKind,
    pub enqueued_at: DateTime<Utc>,
    /// Failed replays so far
    pub retry_count: u32,
}

impl PendingIntent {
    pub(crate) fn new(kind: IntentKind) -> Self {
        Self {
            id: format!("intent_{}", uuid::Uuid::now_v7().simple()),
            kind,
            enqueued_at: Utc::now(),
            retry_count: 0,
        }
    }
}

/// An intent that could not be applied to the authoritative state
#[derive(Error, Debug, Clone, PartialEq)]
#[error("intent {intent_id} ({kind}) failed on attempt {attempt}: {source}")]
pub struct IntentApplyError {
    pub intent_id: String,
    pub kind: &'static str,
    pub attempt: u32,
    #[source]
    pub source: StateError,
}
