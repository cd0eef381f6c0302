// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Structural checks applied where data enters the engine (load and import).
//!
//! Repairs are local and conservative: malformed entries are dropped,
//! duplicates collapse to their first occurrence, and derived section
//! references are re-resolved. Deeper schema validation belongs to the
//! embedding application, which can supply its own [`Validator`].

use std::collections::HashSet;

use tracing::debug;

use crate::model::{Preferences, Schedule, SelectionEntry, DEFAULT_THEME};

/// What a validation pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub repaired: usize,
    pub dropped: usize,
    pub issues: Vec<String>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.repaired == 0 && self.dropped == 0
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.repaired += other.repaired;
        self.dropped += other.dropped;
        self.issues.extend(other.issues);
    }

    fn drop_with(&mut self, issue: String) {
        self.dropped += 1;
        self.issues.push(issue);
    }

    fn repair_with(&mut self, issue: String) {
        self.repaired += 1;
        self.issues.push(issue);
    }
}

pub trait Validator: Send + Sync {
    fn validate_selections(&self, entries: &mut Vec<SelectionEntry>) -> ValidationReport;

    fn validate_schedules(&self, schedules: &mut Vec<Schedule>) -> ValidationReport;

    fn validate_preferences(&self, preferences: &mut Preferences) -> ValidationReport;
}

/// Default structural validator
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralValidator;

impl Validator for StructuralValidator {
    fn validate_selections(&self, entries: &mut Vec<SelectionEntry>) -> ValidationReport {
        let mut report = ValidationReport::default();
        let mut seen = HashSet::new();

        entries.retain(|entry| {
            let id = entry.course_id();
            if id.is_empty() {
                report.drop_with("selection without course id".into());
                return false;
            }
            if !seen.insert(id.to_string()) {
                report.drop_with(format!("duplicate selection of {id}"));
                return false;
            }
            true
        });

        for entry in entries.iter_mut() {
            let before = entry.chosen_section_number.clone();
            if entry.hydrate() && entry.chosen_section_number != before {
                report.repair_with(format!(
                    "section {} no longer offered for {}",
                    before.unwrap_or_default(),
                    entry.course_id()
                ));
            }
        }

        if !report.is_clean() {
            debug!(repaired = report.repaired, dropped = report.dropped, "Selections repaired");
        }
        report
    }

    fn validate_schedules(&self, schedules: &mut Vec<Schedule>) -> ValidationReport {
        let mut report = ValidationReport::default();
        let mut seen = HashSet::new();

        schedules.retain(|schedule| {
            if schedule.id.is_empty() {
                report.drop_with(format!("schedule '{}' without id", schedule.name));
                return false;
            }
            if !seen.insert(schedule.id.clone()) {
                report.drop_with(format!("duplicate schedule id {}", schedule.id));
                return false;
            }
            true
        });

        for schedule in schedules.iter_mut() {
            if schedule.name.trim().is_empty() {
                schedule.name = "Untitled Schedule".into();
                report.repair_with(format!("schedule {} had no name", schedule.id));
            }
            report.merge(self.validate_selections(&mut schedule.selected_courses));
        }
        report
    }

    fn validate_preferences(&self, preferences: &mut Preferences) -> ValidationReport {
        let mut report = ValidationReport::default();
        let defaults = Preferences::default();
        let range = &mut preferences.preferred_time_range;

        let valid_time = |t: &crate::model::Time| t.hours < 24 && t.minutes < 60;
        if !valid_time(&range.start_time) || !valid_time(&range.end_time) {
            *range = defaults.preferred_time_range;
            report.repair_with("preferred time range out of bounds".into());
        } else if range.start_time > range.end_time {
            std::mem::swap(&mut range.start_time, &mut range.end_time);
            report.repair_with("preferred time range inverted".into());
        }

        if preferences.max_daily_hours.is_some_and(|h| h == 0 || h > 24) {
            preferences.max_daily_hours = None;
            report.repair_with("max daily hours out of bounds".into());
        }

        if preferences.theme.trim().is_empty() {
            preferences.theme = DEFAULT_THEME.into();
            report.repair_with("empty theme".into());
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Course, Time, TimeRange};

    fn entry(id: &str) -> SelectionEntry {
        SelectionEntry::new(Course::sample(id, &["A01"]), false)
    }

    #[test]
    fn test_drops_empty_and_duplicate_selections() {
        let mut entries = vec![entry("CS1101"), entry(""), entry("CS1101"), entry("MA1021")];
        let report = StructuralValidator.validate_selections(&mut entries);

        assert_eq!(report.dropped, 2);
        let ids: Vec<_> = entries.iter().map(SelectionEntry::course_id).collect();
        assert_eq!(ids, vec!["CS1101", "MA1021"]);
    }

    #[test]
    fn test_rehydrates_and_reports_vanished_section() {
        let mut good = entry("CS1101");
        good.chosen_section_number = Some("A01".into());
        let mut stale = entry("MA1021");
        stale.chosen_section_number = Some("Z99".into());

        let mut entries = vec![good, stale];
        let report = StructuralValidator.validate_selections(&mut entries);

        assert_eq!(report.repaired, 1);
        assert!(entries[0].chosen_section.is_some());
        assert!(entries[1].chosen_section_number.is_none());
        assert!(entries.iter().all(SelectionEntry::is_consistent));
    }

    #[test]
    fn test_schedules_deduped_and_named() {
        let a = Schedule::new("A", vec![entry("CS1101"), entry("CS1101")]);
        let mut unnamed = Schedule::new("  ", Vec::new());
        unnamed.id = "schedule_x".into();
        let mut schedules = vec![a.clone(), a, unnamed];

        let report = StructuralValidator.validate_schedules(&mut schedules);
        assert_eq!(schedules.len(), 2);
        assert_eq!(schedules[0].selected_courses.len(), 1);
        assert_eq!(schedules[1].name, "Untitled Schedule");
        assert_eq!(report.dropped, 2);
        assert_eq!(report.repaired, 1);
    }

    #[test]
    fn test_preferences_repairs() {
        let mut prefs = Preferences {
            preferred_time_range: TimeRange {
                start_time: Time::new(17, 0),
                end_time: Time::new(9, 0),
            },
            max_daily_hours: Some(0),
            theme: String::new(),
            ..Preferences::default()
        };

        let report = StructuralValidator.validate_preferences(&mut prefs);
        assert_eq!(report.repaired, 3);
        assert_eq!(prefs.preferred_time_range.start_time, Time::new(9, 0));
        assert_eq!(prefs.max_daily_hours, None);
        assert_eq!(prefs.theme, "classic");
    }

    #[test]
    fn test_default_preferences_are_clean() {
        let mut prefs = Preferences::default();
        assert!(StructuralValidator.validate_preferences(&mut prefs).is_clean());
    }
}
