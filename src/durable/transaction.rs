// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Snapshot / apply / verify / restore transactions over the data slots.

use std::fmt;
use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{probe_round_trip, ActiveTransaction, DurableStore, Slot, StoreError};
use crate::model::{Preferences, Schedule, SelectionEntry};
use crate::resilience::{
    Classify, ErrorClass, RetryCondition, RetryError, RetryManager, RetryPolicy,
};
use crate::storage::MediumError;

/// One write inside a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// `None` removes the slot
    ActiveScheduleId(Option<String>),
    Schedules(Vec<Schedule>),
    /// Replace the schedule with the same id, or append it
    UpsertSchedule(Schedule),
    DeleteSchedule(String),
    SelectedCourses(Vec<SelectionEntry>),
    Preferences(Preferences),
    Theme(String),
    /// Remove every data slot
    ClearAll,
}

impl WriteOp {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ActiveScheduleId(_) => "active_schedule_id",
            Self::Schedules(_) => "schedules",
            Self::UpsertSchedule(_) => "upsert_schedule",
            Self::DeleteSchedule(_) => "delete_schedule",
            Self::SelectedCourses(_) => "selected_courses",
            Self::Preferences(_) => "preferences",
            Self::Theme(_) => "theme",
            Self::ClearAll => "clear_all",
        }
    }
}

/// Outcome of a store write. Store calls never fail past this value.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionResult {
    pub success: bool,
    pub transaction_id: String,
    pub error: Option<StoreError>,
    /// Whether every snapshotted key was restored after a failure
    pub rolled_back: bool,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Committed,
    RolledBack,
}

/// Audit log record of a finished transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub transaction_id: String,
    pub outcome: AuditOutcome,
    pub ops: usize,
    pub at: DateTime<Utc>,
}

/// A commit refused by the integrity check
#[derive(Error, Debug)]
#[error("commit failed (snapshot restored: {restored}): {error}")]
pub struct CommitFailure {
    #[source]
    pub error: StoreError,
    /// Every snapshotted key was written back
    pub restored: bool,
}

/// Storage preset, also retrying a refused nested begin.
pub(crate) fn transaction_retry() -> RetryManager {
    RetryManager::new(RetryPolicy::storage().with_condition(RetryCondition::Classes(vec![
        ErrorClass::TransientStorage,
        ErrorClass::Conflict,
    ])))
}

/// An open transaction. Dropping it without committing restores the
/// snapshot.
pub struct Transaction<'a> {
    store: &'a DurableStore,
    id: String,
    backup: Vec<(String, Option<String>)>,
    finished: bool,
}

impl<'a> Transaction<'a> {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Apply one op. The transaction stays open on error.
    pub fn apply(&mut self, op: &WriteOp) -> Result<(), StoreError> {
        let store = self.store;
        match op {
            WriteOp::ActiveScheduleId(Some(id)) => store.put_json(Slot::ActiveScheduleId, id),
            WriteOp::ActiveScheduleId(None) => store.remove_slot(Slot::ActiveScheduleId),
            WriteOp::Schedules(schedules) => store.put_json(Slot::Schedules, schedules),
            WriteOp::UpsertSchedule(schedule) => {
                let mut all: Vec<Schedule> = store.read_slot(Slot::Schedules)?.unwrap_or_default();
                match all.iter_mut().find(|s| s.id == schedule.id) {
                    Some(existing) => *existing = schedule.clone(),
                    None => all.push(schedule.clone()),
                }
                store.put_json(Slot::Schedules, &all)
            }
            WriteOp::DeleteSchedule(id) => {
                let mut all: Vec<Schedule> = store.read_slot(Slot::Schedules)?.unwrap_or_default();
                all.retain(|s| s.id != *id);
                store.put_json(Slot::Schedules, &all)
            }
            WriteOp::SelectedCourses(entries) => store.put_json(Slot::SelectedCourses, entries),
            WriteOp::Preferences(preferences) => store.put_json(Slot::Preferences, preferences),
            WriteOp::Theme(theme) => store.put_json(Slot::Theme, theme),
            WriteOp::ClearAll => Slot::DATA
                .iter()
                .try_for_each(|slot| store.remove_slot(*slot)),
        }
    }

    /// Verify and close. A failed check restores the snapshot first.
    pub fn commit(mut self) -> Result<(), CommitFailure> {
        if let Err(error) = self.store.verify() {
            let restored = self.restore();
            self.finish();
            return Err(CommitFailure { error, restored });
        }
        self.finish();
        Ok(())
    }

    /// Restore the snapshot and close. Returns whether every key was restored.
    pub fn rollback(mut self) -> bool {
        let restored = self.restore();
        self.finish();
        restored
    }

    fn restore(&mut self) -> bool {
        let medium = self.store.medium();
        let mut all_restored = true;
        for (key, previous) in &self.backup {
            let result = match previous {
                Some(value) => medium.set(key, value),
                None => medium.remove(key),
            };
            if let Err(e) = result {
                all_restored = false;
                error!(transaction_id = %self.id, key = %key, error = %e, "Failed to restore key during rollback");
            }
        }
        warn!(transaction_id = %self.id, all_restored, "Transaction rolled back");
        all_restored
    }

    fn finish(&mut self) {
        self.finished = true;
        let mut active = self.store.active.lock();
        if active.as_ref().is_some_and(|tx| tx.id == self.id) {
            *active = None;
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.restore();
            self.finish();
        }
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("keys", &self.backup.len())
            .finish()
    }
}

#[derive(Debug)]
pub(crate) struct TransactionFailure {
    transaction_id: String,
    error: StoreError,
    rolled_back: bool,
}

impl fmt::Display for TransactionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transaction '{}' failed: {}", self.transaction_id, self.error)
    }
}

impl Classify for TransactionFailure {
    fn class(&self) -> ErrorClass {
        self.error.class()
    }
}

impl DurableStore {
    /// Open a transaction, snapshotting every data slot.
    ///
    /// Refused with [`StoreError::NestedTransaction`] while another is open.
    pub fn begin(&self) -> Result<Transaction<'_>, StoreError> {
        let mut active = self.active.lock();
        if let Some(open) = active.as_ref() {
            return Err(StoreError::NestedTransaction {
                active: open.id.clone(),
            });
        }

        let id = format!(
            "tx_{}_{}",
            Utc::now().timestamp_millis(),
            self.tx_counter.fetch_add(1, Ordering::Relaxed) + 1
        );

        let mut backup = Vec::with_capacity(Slot::DATA.len());
        for slot in Slot::DATA {
            let key = self.key(slot);
            let previous = self.medium.get(&key)?;
            backup.push((key, previous));
        }

        *active = Some(ActiveTransaction {
            id: id.clone(),
            started_at: Instant::now(),
        });
        debug!(transaction_id = %id, "Transaction started");

        Ok(Transaction {
            store: self,
            id,
            backup,
            finished: false,
        })
    }

    /// Run `ops` as one transaction, once.
    pub fn run_transaction(&self, ops: &[WriteOp]) -> TransactionResult {
        match self.try_transaction(ops) {
            Ok(transaction_id) => TransactionResult {
                success: true,
                transaction_id,
                error: None,
                rolled_back: false,
                attempts: 1,
            },
            Err(failure) => TransactionResult {
                success: false,
                transaction_id: failure.transaction_id,
                error: Some(failure.error),
                rolled_back: failure.rolled_back,
                attempts: 1,
            },
        }
    }

    /// Single synchronous write with the same snapshot/restore discipline
    pub fn write(&self, op: WriteOp) -> TransactionResult {
        self.run_transaction(std::slice::from_ref(&op))
    }

    /// Run `ops` as one transaction, retrying transient failures. Every
    /// attempt is a complete transaction.
    #[tracing::instrument(skip(self, ops), fields(ops = ops.len()))]
    pub async fn execute_transaction(&self, ops: Vec<WriteOp>) -> TransactionResult {
        let store = self;
        let ops = ops.as_slice();
        let outcome = self
            .retry
            .execute_with_retry("storage transaction", move || async move {
                store.try_transaction(ops)
            })
            .await;

        match outcome.result {
            Ok(transaction_id) => TransactionResult {
                success: true,
                transaction_id,
                error: None,
                rolled_back: false,
                attempts: outcome.attempts,
            },
            Err(RetryError::Operation(failure)) => TransactionResult {
                success: false,
                transaction_id: failure.transaction_id,
                error: Some(failure.error),
                rolled_back: failure.rolled_back,
                attempts: outcome.attempts,
            },
            Err(other) => TransactionResult {
                success: false,
                transaction_id: String::new(),
                error: Some(StoreError::TransientStorage(MediumError::Unavailable(other.to_string()))),
                rolled_back: false,
                attempts: outcome.attempts,
            },
        }
    }

    fn try_transaction(&self, ops: &[WriteOp]) -> Result<String, TransactionFailure> {
        let _timer = crate::time_operation!("store", "transaction");

        let mut tx = self.begin().map_err(|error| {
            warn!(error = %error, "Transaction refused");
            crate::metrics::record_operation("store", "transaction", "rejected");
            TransactionFailure {
                transaction_id: String::new(),
                error,
                rolled_back: false,
            }
        })?;
        let transaction_id = tx.id().to_string();

        for op in ops {
            if let Err(error) = tx.apply(op) {
                warn!(transaction_id = %transaction_id, op = op.name(), error = %error, "Transaction op failed");
                let rolled_back = tx.rollback();
                self.finish_transaction(&transaction_id, ops.len(), false);
                return Err(TransactionFailure {
                    transaction_id,
                    error,
                    rolled_back,
                });
            }
        }

        match tx.commit() {
            Ok(()) => {
                info!(transaction_id = %transaction_id, ops = ops.len(), "Transaction committed");
                self.finish_transaction(&transaction_id, ops.len(), true);
                Ok(transaction_id)
            }
            Err(CommitFailure { error, restored }) => {
                warn!(transaction_id = %transaction_id, error = %error, restored, "Integrity check failed");
                self.finish_transaction(&transaction_id, ops.len(), false);
                Err(TransactionFailure {
                    transaction_id,
                    error,
                    rolled_back: restored,
                })
            }
        }
    }

    fn finish_transaction(&self, transaction_id: &str, ops: usize, committed: bool) {
        crate::metrics::record_transaction(committed, ops);
        crate::metrics::record_operation(
            "store",
            "transaction",
            if committed { "success" } else { "rolled_back" },
        );
        self.append_audit(AuditEntry {
            transaction_id: transaction_id.to_string(),
            outcome: if committed { AuditOutcome::Committed } else { AuditOutcome::RolledBack },
            ops,
            at: Utc::now(),
        });
    }

    /// Best effort; failures are logged and never affect the transaction.
    fn append_audit(&self, entry: AuditEntry) {
        let mut log: Vec<AuditEntry> = match self.read_slot(Slot::TransactionLog) {
            Ok(Some(log)) => log,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Audit log unreadable, starting fresh");
                Vec::new()
            }
        };
        log.push(entry);
        let cap = self.config.audit_log_cap;
        if log.len() > cap {
            log.drain(..log.len() - cap);
        }

        let written = serde_json::to_string(&log)
            .map_err(|e| StoreError::Serialization(e.to_string()))
            .and_then(|text| Ok(self.medium.set(&self.key(Slot::TransactionLog), &text)?));
        if let Err(e) = written {
            warn!(error = %e, "Failed to append audit entry");
        }
    }

    fn put_json<T: Serialize + ?Sized>(&self, slot: Slot, value: &T) -> Result<(), StoreError> {
        let text = serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(self.medium.set(&self.key(slot), &text)?)
    }

    fn remove_slot(&self, slot: Slot) -> Result<(), StoreError> {
        Ok(self.medium.remove(&self.key(slot))?)
    }

    /// Probe round trip, then re-parse every data slot.
    fn verify(&self) -> Result<(), StoreError> {
        let probe_key = format!("{}integrity-probe", self.prefix);
        if !probe_round_trip(self.medium.as_ref(), &probe_key) {
            return Err(StoreError::Integrity("probe round trip failed".into()));
        }

        let strict = |result: Result<(), StoreError>| {
            result.map_err(|e| StoreError::Integrity(format!("slot unreadable after write: {e}")))
        };
        strict(self.read_slot::<String>(Slot::ActiveScheduleId).map(drop))?;
        strict(self.read_slot::<Vec<Schedule>>(Slot::Schedules).map(drop))?;
        strict(self.read_slot::<Vec<SelectionEntry>>(Slot::SelectedCourses).map(drop))?;
        strict(self.read_slot::<Preferences>(Slot::Preferences).map(drop))?;
        strict(self.read_slot::<String>(Slot::Theme).map(drop))?;
        Ok(())
    }
}
