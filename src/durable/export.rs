// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Versioned export envelope and checksum-verified import.
//!
//! Document shape:
//!
//! ```text
//! {
//!   "version": "2.0",
//!   "timestamp": "2026-01-01T00:00:00Z",
//!   "checksum": "-123456789",
//!   "state": { "activeScheduleId": "...", "theme": "classic" },
//!   "schedules": [...],
//!   "preferences": {...},
//!   "selectedCourses": [...]
//! }
//! ```
//!
//! The checksum covers the canonical JSON of `{state, schedules,
//! preferences, selectedCourses}` exactly as they appear in the document.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::codec::{canonical_json, checksum};
use super::{DurableStore, StoreError, WriteOp};
use crate::model::{Preferences, Schedule, SelectionEntry, DEFAULT_THEME};
use crate::validation::ValidationReport;

pub const EXPORT_VERSION: &str = "2.0";

const PAYLOAD_FIELDS: [&str; 4] = ["state", "schedules", "preferences", "selectedCourses"];

/// Upgrades an older export document to [`EXPORT_VERSION`]
pub trait Migration: Send + Sync {
    fn migrate(&self, from_version: &str, document: Value) -> Result<Value, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedState {
    #[serde(default)]
    pub active_schedule_id: Option<String>,
    #[serde(default = "default_theme")]
    pub theme: String,
}

impl Default for ExportedState {
    fn default() -> Self {
        Self {
            active_schedule_id: None,
            theme: default_theme(),
        }
    }
}

fn default_theme() -> String {
    DEFAULT_THEME.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    #[serde(default)]
    pub state: ExportedState,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub selected_courses: Vec<SelectionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEnvelope {
    pub version: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub checksum: String,
    #[serde(flatten)]
    pub payload: ExportPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    pub transaction_id: String,
    pub schedules: usize,
    pub selected_courses: usize,
    pub report: ValidationReport,
}

/// Checksum over the payload fields of a document
fn payload_checksum(document: &Value) -> Result<String, StoreError> {
    let mut payload = Map::new();
    for field in PAYLOAD_FIELDS {
        payload.insert(field.to_string(), document.get(field).cloned().unwrap_or(Value::Null));
    }
    Ok(checksum(&canonical_json(&Value::Object(payload))?))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

impl DurableStore {
    /// Current durable state as an export payload (slot defaults on corruption)
    pub fn export_payload(&self) -> ExportPayload {
        ExportPayload {
            state: ExportedState {
                active_schedule_id: self.load_active_schedule_id().data,
                theme: self.load_theme().data,
            },
            schedules: self.load_schedules().data,
            preferences: self.load_preferences().data,
            selected_courses: self.load_selected_courses().data,
        }
    }

    /// Serialize the durable state into a checksummed export document
    pub fn export_data(&self) -> Result<String, StoreError> {
        let _timer = crate::time_operation!("store", "export");

        let mut document = to_value(&self.export_payload())?;
        let checksum = payload_checksum(&document)?;
        if let Value::Object(fields) = &mut document {
            fields.insert("version".into(), Value::String(EXPORT_VERSION.into()));
            fields.insert("timestamp".into(), Value::String(Utc::now().to_rfc3339()));
            fields.insert("checksum".into(), Value::String(checksum));
        }

        let text = serde_json::to_string_pretty(&document)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        crate::metrics::record_operation("store", "export", "success");
        Ok(text)
    }

    /// Verify, validate and apply an export document in one transaction.
    ///
    /// Nothing is written unless every check passes.
    pub fn import_data(&self, text: &str) -> Result<ImportSummary, StoreError> {
        let _timer = crate::time_operation!("store", "import");
        let result = self.import_document(text);
        let status = if result.is_ok() { "success" } else { "error" };
        crate::metrics::record_operation("store", "import", status);
        result
    }

    fn import_document(&self, text: &str) -> Result<ImportSummary, StoreError> {
        let mut document: Value =
            serde_json::from_str(text).map_err(|e| StoreError::InvalidImport(e.to_string()))?;

        let version = document_version(&document);
        if version != EXPORT_VERSION {
            let Some(migration) = &self.migration else {
                warn!(version = %version, "Import refused: unsupported version");
                return Err(StoreError::UnsupportedVersion(version));
            };
            info!(from = %version, to = EXPORT_VERSION, "Migrating import document");
            document = migration.migrate(&version, document)?;
            let migrated = document_version(&document);
            if migrated != EXPORT_VERSION {
                return Err(StoreError::UnsupportedVersion(migrated));
            }
        }

        match document.get("checksum").and_then(Value::as_str).filter(|c| !c.is_empty()) {
            Some(expected) => {
                let actual = payload_checksum(&document)?;
                if expected != actual {
                    crate::metrics::record_checksum_mismatch();
                    warn!(expected = %expected, actual = %actual, "Import refused: checksum mismatch");
                    return Err(StoreError::ChecksumMismatch {
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }
            None => warn!("Import document carries no checksum, skipping verification"),
        }

        let envelope: ExportEnvelope =
            serde_json::from_value(document).map_err(|e| StoreError::InvalidImport(e.to_string()))?;
        let mut payload = envelope.payload;

        let mut report = self.validator.validate_schedules(&mut payload.schedules);
        report.merge(self.validator.validate_selections(&mut payload.selected_courses));
        report.merge(self.validator.validate_preferences(&mut payload.preferences));

        let active = payload
            .state
            .active_schedule_id
            .filter(|id| payload.schedules.iter().any(|s| s.id == *id));

        let summary_counts = (payload.schedules.len(), payload.selected_courses.len());
        let ops = vec![
            WriteOp::Schedules(payload.schedules),
            WriteOp::SelectedCourses(payload.selected_courses),
            WriteOp::Preferences(payload.preferences),
            WriteOp::Theme(payload.state.theme),
            WriteOp::ActiveScheduleId(active),
        ];

        let result = self.run_transaction(&ops);
        if !result.success {
            return Err(result
                .error
                .unwrap_or_else(|| StoreError::Integrity("import transaction failed".into())));
        }

        info!(
            transaction_id = %result.transaction_id,
            schedules = summary_counts.0,
            repaired = report.repaired,
            dropped = report.dropped,
            "Import applied"
        );
        Ok(ImportSummary {
            transaction_id: result.transaction_id,
            schedules: summary_counts.0,
            selected_courses: summary_counts.1,
            report,
        })
    }
}

fn document_version(document: &Value) -> String {
    document
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or("1.0")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::durable::Slot;
    use crate::model::Course;
    use crate::storage::{InMemoryMedium, KvMedium};
    use std::sync::Arc;

    fn seeded_store() -> (Arc<InMemoryMedium>, DurableStore) {
        let medium = Arc::new(InMemoryMedium::new());
        let store = DurableStore::new(medium.clone(), &SyncConfig::default());

        let mut entry = SelectionEntry::new(Course::sample("CS2102", &["AL01", "AL02"]), true);
        entry.choose_section(Some("AL02"));
        let schedule = Schedule::new("Fall", vec![entry.clone()]);
        let mut preferences = Preferences::default();
        preferences.preferred_days = ["mon".to_string(), "wed".to_string()].into_iter().collect();

        let result = store.run_transaction(&[
            WriteOp::Schedules(vec![schedule.clone()]),
            WriteOp::SelectedCourses(vec![entry]),
            WriteOp::Preferences(preferences),
            WriteOp::ActiveScheduleId(Some(schedule.id)),
        ]);
        assert!(result.success);
        (medium, store)
    }

    fn data_snapshot(medium: &InMemoryMedium, store: &DurableStore) -> Vec<Option<String>> {
        Slot::DATA.iter().map(|s| medium.get(&store.key(*s)).unwrap()).collect()
    }

    #[test]
    fn test_export_envelope_shape() {
        let (_, store) = seeded_store();
        let text = store.export_data().unwrap();
        let doc: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(doc["version"], "2.0");
        assert!(chrono::DateTime::parse_from_rfc3339(doc["timestamp"].as_str().unwrap()).is_ok());
        assert_eq!(doc["state"]["theme"], "classic");
        assert_eq!(doc["preferences"]["preferredDays"]["__type"], "Set");
        assert!(doc["selectedCourses"][0].get("chosenSection").is_none());
        assert_eq!(doc["selectedCourses"][0]["selectedSectionNumber"], "AL02");
    }

    #[test]
    fn test_import_own_export_into_fresh_store() {
        let (_, source) = seeded_store();
        let text = source.export_data().unwrap();

        let medium = Arc::new(InMemoryMedium::new());
        let target = DurableStore::new(medium, &SyncConfig::default());
        let summary = target.import_data(&text).unwrap();

        assert_eq!(summary.schedules, 1);
        assert_eq!(target.export_payload(), source.export_payload());
        let loaded = target.load_selected_courses().data;
        assert_eq!(loaded[0].chosen_section.as_ref().unwrap().number, "AL02");
    }

    #[test]
    fn test_tampered_payload_refused_without_mutation() {
        let (medium, store) = seeded_store();
        let text = store.export_data().unwrap();
        let mut doc: Value = serde_json::from_str(&text).unwrap();
        doc["state"]["theme"] = Value::String("hacked".into());
        let tampered = serde_json::to_string(&doc).unwrap();

        let before = data_snapshot(&medium, &store);
        let err = store.import_data(&tampered).unwrap_err();

        assert!(matches!(err, StoreError::ChecksumMismatch { .. }));
        assert_eq!(data_snapshot(&medium, &store), before);
    }

    #[test]
    fn test_reformatted_document_still_verifies() {
        let (_, store) = seeded_store();
        let text = store.export_data().unwrap();
        let doc: Value = serde_json::from_str(&text).unwrap();
        let compact = serde_json::to_string(&doc).unwrap();

        assert!(store.import_data(&compact).is_ok());
    }

    #[test]
    fn test_unknown_version_without_migration_refused() {
        let (_, store) = seeded_store();
        let err = store.import_data(r#"{"version":"1.0","schedules":[]}"#).unwrap_err();
        assert_eq!(err, StoreError::UnsupportedVersion("1.0".into()));
    }

    struct V1ToV2;

    impl Migration for V1ToV2 {
        fn migrate(&self, from_version: &str, mut document: Value) -> Result<Value, StoreError> {
            assert_eq!(from_version, "1.0");
            document["version"] = Value::String(EXPORT_VERSION.into());
            if let Some(courses) = document.get_mut("courses").map(Value::take) {
                document["selectedCourses"] = courses;
            }
            Ok(document)
        }
    }

    #[test]
    fn test_migration_hook_runs_before_verification() {
        let medium = Arc::new(InMemoryMedium::new());
        let store = DurableStore::new(medium, &SyncConfig::default()).with_migration(Arc::new(V1ToV2));
        let course = serde_json::to_value(SelectionEntry::new(Course::sample("MA1021", &["A01"]), false)).unwrap();
        let doc = serde_json::json!({ "version": "1.0", "courses": [course] });

        let summary = store.import_data(&doc.to_string()).unwrap();
        assert_eq!(summary.selected_courses, 1);
        assert_eq!(store.load_selected_courses().data[0].course_id(), "MA1021");
    }

    #[test]
    fn test_dangling_active_id_dropped_on_import() {
        let (_, store) = seeded_store();
        let doc = serde_json::json!({
            "version": "2.0",
            "state": { "activeScheduleId": "schedule_missing", "theme": "dark" },
            "schedules": [],
        });

        store.import_data(&doc.to_string()).unwrap();
        assert_eq!(store.load_active_schedule_id().data, None);
        assert_eq!(store.load_theme().data, "dark");
    }

    #[test]
    fn test_garbage_refused() {
        let (_, store) = seeded_store();
        assert!(matches!(store.import_data("not json"), Err(StoreError::InvalidImport(_))));
    }
}
