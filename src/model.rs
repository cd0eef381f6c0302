// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Planner data model.
//!
//! Courses and sections come from the course catalog and are treated as
//! read-only reference data. A [`SelectionEntry`] is the unit of user state:
//! one chosen course, optionally pinned to one of that course's sections.
//!
//! The hydrated section reference on a selection is derived data. It is never
//! serialized, and it is only ever resolved by number against the course's
//! own section list:
//!
//! ```
//! use schedule_sync::model::{Course, SelectionEntry};
//!
//! let course = Course::sample("CS2102", &["AL01", "AL02"]);
//! let mut entry = SelectionEntry::new(course, true);
//!
//! assert!(entry.choose_section(Some("AL02")));
//! assert_eq!(entry.chosen_section_number.as_deref(), Some("AL02"));
//! assert!(entry.chosen_section.is_some());
//!
//! // Unknown sections clear the choice instead of trusting the caller
//! assert!(!entry.choose_section(Some("ZZ99")));
//! assert!(entry.chosen_section_number.is_none());
//! assert!(entry.chosen_section.is_none());
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::durable::codec::tagged_set;

/// Default theme id used when nothing is stored
pub const DEFAULT_THEME: &str = "classic";

/// Wall-clock time of day
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Time {
    pub hours: u8,
    pub minutes: u8,
}

impl Time {
    #[must_use]
    pub const fn new(hours: u8, minutes: u8) -> Self {
        Self { hours, minutes }
    }
}

/// One meeting block of a section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub professor: String,
    pub start_time: Time,
    pub end_time: Time,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub building: String,
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub days: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub crn: u32,
    pub number: String,
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub seats: u32,
    #[serde(default)]
    pub seats_available: u32,
    #[serde(default)]
    pub periods: Vec<Period>,
}

impl Section {
    /// A section is usable only when it carries both its number and its term.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.number.is_empty() && !self.term.is_empty()
    }
}

/// Owning department. The catalog's back-reference list of courses is not
/// part of the model.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Department {
    pub abbreviation: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub number: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub department: Department,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub min_credits: f32,
    #[serde(default)]
    pub max_credits: f32,
}

impl Course {
    /// Look up one of this course's own sections. Incomplete sections are
    /// treated as absent.
    #[must_use]
    pub fn section(&self, number: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.number == number)
            .filter(|s| s.is_complete())
    }

    /// Small fully-formed course, handy for docs and tests.
    #[doc(hidden)]
    #[must_use]
    pub fn sample(id: &str, section_numbers: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            number: id.trim_start_matches(|c: char| c.is_ascii_alphabetic()).to_string(),
            name: format!("Course {id}"),
            description: String::new(),
            department: Department {
                abbreviation: id.chars().take_while(|c| c.is_ascii_alphabetic()).collect(),
                name: String::new(),
            },
            sections: section_numbers
                .iter()
                .enumerate()
                .map(|(i, n)| Section {
                    crn: 10_000 + i as u32,
                    number: (*n).to_string(),
                    term: "A".to_string(),
                    seats: 30,
                    seats_available: 30,
                    periods: Vec::new(),
                })
                .collect(),
            min_credits: 3.0,
            max_credits: 3.0,
        }
    }
}

/// A selected course.
///
/// `chosen_section` is present iff `chosen_section_number` is present and
/// names a complete section of `course`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionEntry {
    pub course: Course,
    #[serde(default, rename = "selectedSectionNumber")]
    pub chosen_section_number: Option<String>,
    #[serde(skip)]
    pub chosen_section: Option<Section>,
    #[serde(default)]
    pub is_required: bool,
}

impl SelectionEntry {
    #[must_use]
    pub fn new(course: Course, is_required: bool) -> Self {
        Self {
            course,
            chosen_section_number: None,
            chosen_section: None,
            is_required,
        }
    }

    #[must_use]
    pub fn course_id(&self) -> &str {
        &self.course.id
    }

    /// Pin (or clear, with `None`) the chosen section, resolving it from the
    /// course's own list. Returns whether a section is now chosen.
    pub fn choose_section(&mut self, number: Option<&str>) -> bool {
        let resolved = number.and_then(|n| self.course.section(n)).cloned();
        self.chosen_section_number = resolved.as_ref().map(|s| s.number.clone());
        self.chosen_section = resolved;
        self.chosen_section.is_some()
    }

    /// Re-resolve a missing or incomplete section reference. A number that no
    /// longer resolves is cleared. Returns true if anything changed.
    pub fn hydrate(&mut self) -> bool {
        let Some(number) = self.chosen_section_number.clone() else {
            let had_section = self.chosen_section.take().is_some();
            return had_section;
        };

        let trusted = self
            .chosen_section
            .as_ref()
            .is_some_and(|s| self.course.section(&number) == Some(s));
        if trusted {
            return false;
        }

        self.choose_section(Some(&number));
        true
    }

    /// Whether the section invariant currently holds
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        match (&self.chosen_section_number, &self.chosen_section) {
            (None, None) => true,
            (Some(n), Some(s)) => s.number == *n && self.course.section(n) == Some(s),
            _ => false,
        }
    }
}

/// Hydrate every entry of a selection list in place
pub fn hydrate_all(entries: &mut [SelectionEntry]) -> usize {
    entries.iter_mut().map(SelectionEntry::hydrate).filter(|c| *c).count()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub selected_courses: Vec<SelectionEntry>,
    /// Combinations produced by the external generator; opaque here.
    #[serde(default)]
    pub generated_schedules: Vec<Value>,
}

impl Schedule {
    #[must_use]
    pub fn new(name: impl Into<String>, selected_courses: Vec<SelectionEntry>) -> Self {
        Self {
            id: format!("schedule_{}", uuid::Uuid::now_v7().simple()),
            name: name.into(),
            selected_courses,
            generated_schedules: Vec::new(),
        }
    }
}

/// Partial update applied by `update_schedule`
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub name: Option<String>,
    pub selected_courses: Option<Vec<SelectionEntry>>,
    pub generated_schedules: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start_time: Time,
    pub end_time: Time,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub preferred_time_range: TimeRange,
    #[serde(with = "tagged_set")]
    pub preferred_days: BTreeSet<String>,
    #[serde(default)]
    pub avoid_back_to_back_classes: bool,
    #[serde(default)]
    pub max_daily_hours: Option<u8>,
    #[serde(default)]
    pub preferred_buildings: Vec<String>,
    #[serde(default = "default_theme")]
    pub theme: String,
}

fn default_theme() -> String {
    DEFAULT_THEME.to_string()
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            preferred_time_range: TimeRange {
                start_time: Time::new(8, 0),
                end_time: Time::new(18, 0),
            },
            preferred_days: ["mon", "tue", "wed", "thu", "fri"]
                .into_iter()
                .map(String::from)
                .collect(),
            avoid_back_to_back_classes: false,
            max_daily_hours: None,
            preferred_buildings: Vec::new(),
            theme: default_theme(),
        }
    }
}

/// Partial update applied by `update_preferences`
#[derive(Debug, Clone, Default)]
pub struct PreferencesUpdate {
    pub preferred_time_range: Option<TimeRange>,
    pub preferred_days: Option<BTreeSet<String>>,
    pub avoid_back_to_back_classes: Option<bool>,
    pub max_daily_hours: Option<Option<u8>>,
    pub preferred_buildings: Option<Vec<String>>,
    pub theme: Option<String>,
}

impl Preferences {
    pub fn apply(&mut self, update: PreferencesUpdate) {
        if let Some(range) = update.preferred_time_range {
            self.preferred_time_range = range;
        }
        if let Some(days) = update.preferred_days {
            self.preferred_days = days;
        }
        if let Some(avoid) = update.avoid_back_to_back_classes {
            self.avoid_back_to_back_classes = avoid;
        }
        if let Some(hours) = update.max_daily_hours {
            self.max_daily_hours = hours;
        }
        if let Some(buildings) = update.preferred_buildings {
            self.preferred_buildings = buildings;
        }
        if let Some(theme) = update.theme {
            self.theme = theme;
        }
    }
}
