// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Transactional persistence of planner state over a [`KvMedium`].
//!
//! The store owns five data slots plus a best-effort audit log:
//!
//! | Slot | Key suffix | Default |
//! |---|---|---|
//! | [`Slot::ActiveScheduleId`] | `active-schedule-id` | `None` |
//! | [`Slot::Schedules`] | `schedules` | empty |
//! | [`Slot::SelectedCourses`] | `selected-courses` | empty |
//! | [`Slot::Preferences`] | `preferences` | [`Preferences::default`] |
//! | [`Slot::Theme`] | `theme` | `"classic"` |
//! | [`Slot::TransactionLog`] | `transaction-log` | empty |
//!
//! Every data write goes through a [`Transaction`]: all data slots are
//! snapshotted, the ops run, an integrity check runs, and any failure
//! restores every snapshotted key verbatim. Loaders never fail: a missing or
//! unparsable slot yields its default together with `valid = false` and the
//! reason.
//!
//! ```
//! use std::sync::Arc;
//! use schedule_sync::durable::{DurableStore, WriteOp};
//! use schedule_sync::storage::InMemoryMedium;
//! use schedule_sync::SyncConfig;
//!
//! let store = DurableStore::new(Arc::new(InMemoryMedium::new()), &SyncConfig::default());
//! let result = store.write(WriteOp::Theme("dark".into()));
//! assert!(result.success);
//! assert_eq!(store.load_theme().data, "dark");
//! ```

pub mod codec;
pub mod export;
pub mod transaction;

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

use crate::config::SyncConfig;
use crate::model::{hydrate_all, Preferences, Schedule, SelectionEntry, DEFAULT_THEME};
use crate::resilience::{Classify, ErrorClass, HealthProbe, HealthReport, RetryManager};
use crate::storage::{KvMedium, MediumError};
use crate::validation::{StructuralValidator, Validator};

pub use export::{ExportEnvelope, ExportPayload, ExportedState, ImportSummary, Migration, EXPORT_VERSION};
pub use transaction::{AuditEntry, CommitFailure, Transaction, TransactionResult, WriteOp};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("transient storage failure: {0}")]
    TransientStorage(MediumError),

    #[error("storage medium failure: {0}")]
    Medium(MediumError),

    #[error("corrupt data in slot '{slot}': {reason}")]
    Corruption { slot: &'static str, reason: String },

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("transaction {active} already in progress")]
    NestedTransaction { active: String },

    #[error("unsupported export version '{0}'")]
    UnsupportedVersion(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("invalid import document: {0}")]
    InvalidImport(String),
}

impl From<MediumError> for StoreError {
    fn from(err: MediumError) -> Self {
        match err.class() {
            ErrorClass::TransientStorage => Self::TransientStorage(err),
            _ => Self::Medium(err),
        }
    }
}

impl Classify for StoreError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::TransientStorage(_) => ErrorClass::TransientStorage,
            Self::Corruption { .. } => ErrorClass::Corruption,
            Self::Integrity(_) => ErrorClass::Integrity,
            Self::NestedTransaction { .. } => ErrorClass::Conflict,
            Self::Medium(_)
            | Self::ChecksumMismatch { .. }
            | Self::UnsupportedVersion(_)
            | Self::Serialization(_)
            | Self::InvalidImport(_) => ErrorClass::Permanent,
        }
    }
}

/// A durable key slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    ActiveScheduleId,
    Schedules,
    SelectedCourses,
    Preferences,
    Theme,
    /// Audit log; written outside transactions
    TransactionLog,
}

impl Slot {
    /// Slots managed (snapshotted and restored) by every transaction
    pub const DATA: [Slot; 5] = [
        Slot::ActiveScheduleId,
        Slot::Schedules,
        Slot::SelectedCourses,
        Slot::Preferences,
        Slot::Theme,
    ];

    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::ActiveScheduleId => "active-schedule-id",
            Self::Schedules => "schedules",
            Self::SelectedCourses => "selected-courses",
            Self::Preferences => "preferences",
            Self::Theme => "theme",
            Self::TransactionLog => "transaction-log",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Loader result: always carries usable data.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadResult<T> {
    pub data: T,
    /// False when the slot was unreadable or corrupt and `data` is the default
    pub valid: bool,
    pub error: Option<StoreError>,
}

impl<T> LoadResult<T> {
    fn ok(data: T) -> Self {
        Self { data, valid: true, error: None }
    }

    fn fallback(data: T, error: StoreError) -> Self {
        Self { data, valid: false, error: Some(error) }
    }
}

pub(crate) struct ActiveTransaction {
    pub id: String,
    pub started_at: Instant,
}

/// Store health: medium probes plus stuck-transaction detection
#[derive(Debug, Clone)]
pub struct StoreHealth {
    pub healthy: bool,
    pub probes: HealthReport,
    /// Id of a transaction open longer than the configured threshold
    pub stuck_transaction: Option<String>,
    pub issues: Vec<String>,
}

/// Transactional multi-slot store. Cheap to share behind an `Arc`.
pub struct DurableStore {
    medium: Arc<dyn KvMedium>,
    prefix: String,
    config: SyncConfig,
    retry: RetryManager,
    validator: Arc<dyn Validator>,
    migration: Option<Arc<dyn Migration>>,
    active: Mutex<Option<ActiveTransaction>>,
    tx_counter: AtomicU64,
}

impl DurableStore {
    pub fn new(medium: Arc<dyn KvMedium>, config: &SyncConfig) -> Self {
        Self {
            medium,
            prefix: config.key_prefix.clone(),
            config: config.clone(),
            retry: transaction::transaction_retry(),
            validator: Arc::new(StructuralValidator),
            migration: None,
            active: Mutex::new(None),
            tx_counter: AtomicU64::new(0),
        }
    }

    /// Replace the import/load boundary validator
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    /// Install a migration hook for importing older export versions
    #[must_use]
    pub fn with_migration(mut self, migration: Arc<dyn Migration>) -> Self {
        self.migration = Some(migration);
        self
    }

    /// Override the retry policy wrapping async transactions
    #[must_use]
    pub fn with_retry(mut self, retry: RetryManager) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn key(&self, slot: Slot) -> String {
        format!("{}{}", self.prefix, slot.suffix())
    }

    #[must_use]
    pub fn validator(&self) -> &Arc<dyn Validator> {
        &self.validator
    }

    pub(crate) fn medium(&self) -> &Arc<dyn KvMedium> {
        &self.medium
    }

    /// Raw stored text for a slot
    pub fn read_raw(&self, slot: Slot) -> Result<Option<String>, StoreError> {
        Ok(self.medium.get(&self.key(slot))?)
    }

    /// Strict read: absent is `Ok(None)`, unparsable is `Corruption`
    pub(crate) fn read_slot<T: DeserializeOwned>(&self, slot: Slot) -> Result<Option<T>, StoreError> {
        match self.read_raw(slot)? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Corruption {
                    slot: slot.suffix(),
                    reason: e.to_string(),
                }),
        }
    }

    fn load_slot<T: DeserializeOwned>(&self, slot: Slot, default: impl FnOnce() -> T) -> LoadResult<T> {
        match self.read_slot(slot) {
            Ok(Some(value)) => LoadResult::ok(value),
            Ok(None) => LoadResult::ok(default()),
            Err(err) => {
                if matches!(err, StoreError::Corruption { .. }) {
                    crate::metrics::record_corruption(slot.suffix());
                }
                warn!(slot = %slot, error = %err, "Slot unreadable, using default");
                LoadResult::fallback(default(), err)
            }
        }
    }

    pub fn load_active_schedule_id(&self) -> LoadResult<Option<String>> {
        self.load_slot(Slot::ActiveScheduleId, || None)
    }

    /// Schedules with every selection's section reference re-hydrated
    pub fn load_schedules(&self) -> LoadResult<Vec<Schedule>> {
        let mut result = self.load_slot(Slot::Schedules, Vec::<Schedule>::new);
        for schedule in &mut result.data {
            hydrate_all(&mut schedule.selected_courses);
        }
        result
    }

    pub fn load_selected_courses(&self) -> LoadResult<Vec<SelectionEntry>> {
        let mut result = self.load_slot(Slot::SelectedCourses, Vec::<SelectionEntry>::new);
        hydrate_all(&mut result.data);
        result
    }

    pub fn load_preferences(&self) -> LoadResult<Preferences> {
        self.load_slot(Slot::Preferences, Preferences::default)
    }

    pub fn load_theme(&self) -> LoadResult<String> {
        self.load_slot(Slot::Theme, || DEFAULT_THEME.to_string())
    }

    pub fn load_audit_log(&self) -> LoadResult<Vec<AuditEntry>> {
        self.load_slot(Slot::TransactionLog, Vec::new)
    }

    pub fn save_active_schedule_id(&self, id: Option<String>) -> TransactionResult {
        self.write(WriteOp::ActiveScheduleId(id))
    }

    pub fn save_schedules(&self, schedules: Vec<Schedule>) -> TransactionResult {
        self.write(WriteOp::Schedules(schedules))
    }

    pub fn save_selected_courses(&self, entries: Vec<SelectionEntry>) -> TransactionResult {
        self.write(WriteOp::SelectedCourses(entries))
    }

    pub fn save_preferences(&self, preferences: Preferences) -> TransactionResult {
        self.write(WriteOp::Preferences(preferences))
    }

    pub fn save_theme(&self, theme: impl Into<String>) -> TransactionResult {
        self.write(WriteOp::Theme(theme.into()))
    }

    /// Remove every data slot in one transaction. The audit log is kept.
    pub fn clear_all(&self) -> TransactionResult {
        self.write(WriteOp::ClearAll)
    }

    /// Id of the transaction currently open, if any
    #[must_use]
    pub fn active_transaction(&self) -> Option<String> {
        self.active.lock().as_ref().map(|tx| tx.id.clone())
    }

    /// Probe the medium and every slot, and flag a stuck transaction.
    pub async fn health(&self) -> StoreHealth {
        let mut probes = vec![self.writable_probe()];
        probes.push(self.slot_probe::<Option<String>>(Slot::ActiveScheduleId));
        probes.push(self.slot_probe::<Vec<Schedule>>(Slot::Schedules));
        probes.push(self.slot_probe::<Vec<SelectionEntry>>(Slot::SelectedCourses));
        probes.push(self.slot_probe::<Preferences>(Slot::Preferences));
        probes.push(self.slot_probe::<String>(Slot::Theme));

        let report = RetryManager::health_check(&probes).await;
        let mut issues: Vec<String> = report.failing().map(|name| format!("probe '{name}' failed")).collect();

        let threshold = self.config.stuck_transaction_after();
        let stuck_transaction = self
            .active
            .lock()
            .as_ref()
            .filter(|tx| tx.started_at.elapsed() > threshold)
            .map(|tx| tx.id.clone());
        if let Some(id) = &stuck_transaction {
            warn!(transaction_id = %id, "Transaction appears stuck");
            issues.push(format!("transaction {id} open longer than {}s", threshold.as_secs()));
        }

        StoreHealth {
            healthy: issues.is_empty(),
            probes: report,
            stuck_transaction,
            issues,
        }
    }

    fn writable_probe(&self) -> HealthProbe {
        let medium = Arc::clone(&self.medium);
        let key = format!("{}health-probe", self.prefix);
        HealthProbe::new("medium_writable", move || probe_round_trip(medium.as_ref(), &key))
    }

    fn slot_probe<T: DeserializeOwned + 'static>(&self, slot: Slot) -> HealthProbe {
        let medium = Arc::clone(&self.medium);
        let key = self.key(slot);
        HealthProbe::new(format!("slot_{slot}"), move || match medium.get(&key) {
            Ok(None) => true,
            Ok(Some(raw)) => serde_json::from_str::<T>(&raw).is_ok(),
            Err(_) => false,
        })
    }
}

/// Write, read back and remove a probe value
pub(crate) fn probe_round_trip(medium: &dyn KvMedium, key: &str) -> bool {
    let token = uuid::Uuid::new_v4().simple().to_string();
    let ok = medium.set(key, &token).is_ok()
        && medium.get(key).ok().flatten().as_deref() == Some(token.as_str());
    let removed = medium.remove(key).is_ok();
    ok && removed
}

impl fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableStore")
            .field("medium", &self.medium.name())
            .field("prefix", &self.prefix)
            .field("active_transaction", &self.active_transaction())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Course;
    use crate::storage::InMemoryMedium;

    fn store() -> (Arc<InMemoryMedium>, DurableStore) {
        let medium = Arc::new(InMemoryMedium::new());
        let store = DurableStore::new(medium.clone(), &SyncConfig::default());
        (medium, store)
    }

    #[test]
    fn test_keys_use_prefix() {
        let (_, store) = store();
        assert_eq!(store.key(Slot::Schedules), "wpi-planner-schedules");
        assert_eq!(store.key(Slot::ActiveScheduleId), "wpi-planner-active-schedule-id");
    }

    #[test]
    fn test_loaders_default_on_absence() {
        let (_, store) = store();

        let active = store.load_active_schedule_id();
        assert!(active.valid);
        assert_eq!(active.data, None);

        assert!(store.load_schedules().data.is_empty());
        assert!(store.load_selected_courses().data.is_empty());
        assert_eq!(store.load_preferences().data, Preferences::default());
        assert_eq!(store.load_theme().data, "classic");
    }

    #[test]
    fn test_corrupt_slot_falls_back_with_error() {
        let (medium, store) = store();
        medium.set("wpi-planner-preferences", "{not json").unwrap();

        let prefs = store.load_preferences();
        assert!(!prefs.valid);
        assert_eq!(prefs.data, Preferences::default());
        assert!(matches!(
            prefs.error,
            Some(StoreError::Corruption { slot: "preferences", .. })
        ));
    }

    #[test]
    fn test_loaded_selections_are_hydrated() {
        let (_, store) = store();
        let mut entry = SelectionEntry::new(Course::sample("CS2102", &["AL01"]), true);
        entry.choose_section(Some("AL01"));
        assert!(store.save_selected_courses(vec![entry]).success);

        let loaded = store.load_selected_courses();
        assert!(loaded.valid);
        assert!(loaded.data[0].chosen_section.is_some());
        assert!(loaded.data[0].is_consistent());
    }

    #[test]
    fn test_error_classes() {
        let transient: StoreError = MediumError::Unavailable("x".into()).into();
        assert_eq!(transient.class(), ErrorClass::TransientStorage);

        let io: StoreError = MediumError::Io("x".into()).into();
        assert_eq!(io.class(), ErrorClass::Permanent);

        let nested = StoreError::NestedTransaction { active: "tx".into() };
        assert_eq!(nested.class(), ErrorClass::Conflict);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_on_clean_store() {
        let (_, store) = store();
        let health = store.health().await;
        assert!(health.healthy, "{:?}", health.issues);
        assert!(health.stuck_transaction.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_flags_corrupt_slot() {
        let (medium, store) = store();
        medium.set("wpi-planner-schedules", "[{").unwrap();

        let health = store.health().await;
        assert!(!health.healthy);
        assert_eq!(health.probes.failing().collect::<Vec<_>>(), vec!["slot_schedules"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_flags_stuck_transaction() {
        let (_, store) = store();
        let tx = store.begin().unwrap();

        tokio::time::advance(std::time::Duration::from_secs(31)).await;
        let health = store.health().await;
        assert_eq!(health.stuck_transaction.as_deref(), Some(tx.id()));
        assert!(!health.healthy);

        drop(tx);
        assert!(store.active_transaction().is_none());
    }
}
