// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Schedule Sync
//!
//! Optimistic state synchronization for a course-schedule planner.
//!
//! ## Architecture
//!
//! User writes land in a zero-latency cache and are replayed into the
//! authoritative state in batches; the authoritative state flushes to a
//! transactional key-value store on a debounce.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     OptimisticCache                         │
//! │  • Synchronous reads/writes for the UI                     │
//! │  • Every write queued as a PendingIntent                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                (SyncCoordinator: every 2.5s / on demand)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    StateOrchestrator                        │
//! │  • Authoritative schedules, selections, preferences        │
//! │  • FIFO change events, dirty tracking                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                      (500ms debounced flush)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DurableStore                           │
//! │  • Multi-slot transactions with snapshot rollback          │
//! │  • Corruption fallback, checksummed export/import          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                   KvMedium (memory / files)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use schedule_sync::{
//!     model::Course, DurableStore, InMemoryCatalog, InMemoryMedium, OptimisticCache,
//!     StateOrchestrator, SyncConfig, SyncCoordinator,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SyncConfig::default();
//!     let catalog: InMemoryCatalog = [Course::sample("CS2102", &["AL01", "AL02"])].into_iter().collect();
//!
//!     let store = Arc::new(DurableStore::new(Arc::new(InMemoryMedium::new()), &config));
//!     let orchestrator = StateOrchestrator::new(store, Arc::new(catalog), &config);
//!     orchestrator.load_from_storage();
//!
//!     let cache = Arc::new(OptimisticCache::new(orchestrator.clone(), &config));
//!     let coordinator = SyncCoordinator::new(cache.clone(), &config);
//!     coordinator.start();
//!
//!     // Visible immediately, applied to the orchestrator on the next batch
//!     cache.select_course(&Course::sample("CS2102", &["AL01", "AL02"]), true);
//!     cache.set_selected_section("CS2102", Some("AL01"));
//!     coordinator.process_batch_now().await;
//!
//!     assert_eq!(orchestrator.selected_courses().len(), 1);
//!     orchestrator.save().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`cache`]: Optimistic cache and pending intents
//! - [`coordinator`]: Batch driver and save-state feedback
//! - [`orchestrator`]: Authoritative state, events, load/save
//! - [`durable`]: Transactions, slot codecs, export/import
//! - [`storage`]: Key-value media (memory, files)
//! - [`resilience`]: Retry, circuit breaker, batch retry, health probes
//! - [`validation`]: Boundary repair of loaded and imported data

pub mod cache;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod durable;
pub(crate) mod listeners;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod resilience;
pub mod storage;
pub mod timer;
pub mod validation;

pub use cache::{IntentKind, OptimisticCache, PendingIntent, SyncError, SyncOutcome};
pub use catalog::{CourseCatalog, InMemoryCatalog};
pub use config::SyncConfig;
pub use coordinator::{BatchResult, CoordinatorOptions, SaveIndicator, SaveState, SyncCoordinator, SyncSource};
pub use durable::{DurableStore, LoadResult, StoreError, TransactionResult, WriteOp};
pub use listeners::ListenerId;
pub use orchestrator::{ChangeSource, StateError, StateEvent, StateOrchestrator};
pub use resilience::{CircuitBreaker, CircuitConfig, RetryManager, RetryPolicy};
pub use storage::{FileMedium, InMemoryMedium, KvMedium, MediumError};
pub use validation::{StructuralValidator, ValidationReport, Validator};
pub use metrics::LatencyTimer;
