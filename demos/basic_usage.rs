// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic schedule-sync usage example.
//!
//! Demonstrates:
//! 1. Wiring store, orchestrator, cache and coordinator over a file medium
//! 2. Optimistic selections that are visible before any sync
//! 3. A batch replay into the authoritative state
//! 4. The debounced flush to disk and a reload from it
//! 5. Export to a checksummed document
//! 6. Displaying metrics
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=schedule_sync=debug cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use schedule_sync::model::Course;
use schedule_sync::{
    DurableStore, FileMedium, InMemoryCatalog, OptimisticCache, StateOrchestrator, SyncConfig, SyncCoordinator,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("schedule_sync=info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           schedule-sync: Basic Usage Example                  ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Wire the layers
    // ─────────────────────────────────────────────────────────────────────────
    let dir = tempfile::tempdir()?;
    println!("📦 Opening file medium at {}", dir.path().display());

    let config = SyncConfig {
        batch_interval_ms: 300,
        ..SyncConfig::default()
    };
    let catalog: Arc<InMemoryCatalog> = Arc::new(
        [
            Course::sample("CS2102", &["AL01", "AL02"]),
            Course::sample("MA1022", &["A01", "B01"]),
            Course::sample("PH1110", &["AL01"]),
        ]
        .into_iter()
        .collect(),
    );

    let medium = Arc::new(FileMedium::open(dir.path())?);
    let store = Arc::new(DurableStore::new(medium.clone(), &config));
    let orchestrator = StateOrchestrator::new(store, catalog.clone(), &config);
    let report = orchestrator.load_from_storage();
    println!("   └─ Loaded (default schedule created: {})", report.created_default_schedule);

    orchestrator.add_listener(|event, _| println!("   │  event: {:?} ({:?})", event.kind, event.source));

    let cache = Arc::new(OptimisticCache::new(orchestrator.clone(), &config));
    let coordinator = SyncCoordinator::new(cache.clone(), &config);
    coordinator.add_save_indicator(|state: schedule_sync::SaveState| println!("   │  save state → {state}"));
    coordinator.start();

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Optimistic writes
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Selecting courses through the cache...");
    let started = Instant::now();
    cache.select_course(&Course::sample("CS2102", &["AL01", "AL02"]), true);
    cache.set_selected_section("CS2102", Some("AL02"));
    cache.select_course(&Course::sample("MA1022", &["A01", "B01"]), false);
    println!("   ⚡ 3 writes in {:?}", started.elapsed());

    for entry in cache.get_selections() {
        println!(
            "   └─ {} required={} section={}",
            entry.course.id,
            entry.is_required,
            entry.chosen_section_number.as_deref().unwrap_or("-")
        );
    }
    println!("   Pending intents: {}", cache.pending_count());
    println!("   Orchestrator selections: {}", orchestrator.selected_courses().len());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Batch replay
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔄 Waiting for the coordinator tick...");
    tokio::time::sleep(Duration::from_millis(500)).await;
    orchestrator.wait_for_events().await;
    println!("   └─ Orchestrator selections: {}", orchestrator.selected_courses().len());

    let batch = coordinator.process_batch_now().await;
    println!("   └─ Manual batch {}: success={} processed={}", batch.batch_id, batch.success, batch.intents_processed);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Debounced flush and reload
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n💾 Waiting for the debounced flush...");
    tokio::time::sleep(config.debounce() + Duration::from_millis(200)).await;
    println!("   └─ Unsaved changes: {}", orchestrator.has_unsaved_changes());

    let reload = StateOrchestrator::new(Arc::new(DurableStore::new(medium, &config)), catalog, &config);
    reload.load_from_storage();
    println!("   └─ Reloaded selections: {}", reload.selected_courses().len());

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Export
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📤 Exporting...");
    let exported = orchestrator.export_data().await?;
    println!("   └─ {} bytes", exported.len());
    let health = orchestrator.health().await;
    println!("   └─ Healthy: {} {:?}", health.healthy, health.issues);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    println!("\n🛑 Stopping coordinator...");
    coordinator.stop();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, sorted by name
fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters = Vec::new();
    let mut gauges = Vec::new();
    let mut histograms = Vec::new();

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let name = key.name().to_string();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((name, label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name, label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                let avg = if count > 0 { sum / count as f64 } else { 0.0 };
                histograms.push((name, label_str, count, avg));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    if !counters.is_empty() {
        println!("   ┌─ Counters");
        for (name, labels, value) in &counters {
            println!("   │  └─ {name}{labels} = {value}");
        }
    }
    if !gauges.is_empty() {
        println!("   ├─ Gauges");
        for (name, labels, value) in &gauges {
            println!("   │  └─ {name}{labels} = {value}");
        }
    }
    if !histograms.is_empty() {
        println!("   └─ Histograms");
        for (name, labels, count, avg) in &histograms {
            println!("      └─ {name}{labels}: n={count} avg={avg:.6}");
        }
    }
}
