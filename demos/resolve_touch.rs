// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Touch resolution walkthrough.
//!
//! Demonstrates:
//! 1. Simulating a delivery pipeline with touches at every stage
//! 2. Resolving each touch and seeing which tier answered
//! 3. A touch that exists nowhere (full cascade)
//! 4. Displaying the metrics the resolver emits
//!
//! Runs entirely in-process. Set `TOUCH_REDIS_URL` to scan real Redis lists
//! instead of in-memory ones (the demo pushes its own entries).
//!
//! # Run
//!
//! ```bash
//! cargo run --example resolve_touch
//! TOUCH_REDIS_URL=redis://localhost:6379 cargo run --example resolve_touch
//! ```

use std::sync::Arc;
use std::time::Duration;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use redis::AsyncCommands;
use serde_json::json;
use touch_resolver::{
    InMemoryOwnerStore, InMemoryQueueStore, QueueEntry, QueueStage, QueueStore,
    RedisQueueStore, ResolverConfig, TouchResolver,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "touch_resolver=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           touch-resolver: Resolution Walkthrough              ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Populate the pipeline
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Populating pipeline...");

    let owners = Arc::new(InMemoryOwnerStore::new());
    owners.insert("tch_persisted01", "user_alice");
    owners.insert_unreplicated("tch_justwritten", "user_frank");
    println!("   └─ user_touches: tch_persisted01 (replicated), tch_justwritten (primary only)");

    let staged = [
        (QueueStage::PendingSend, "tch_pendingsend", "user_bob"),
        (QueueStage::PendingPersist, "tch_pendinglog0", "user_carol"),
        (QueueStage::InPersist, "tch_purgatory01", "user_dave"),
    ];

    let queues: Arc<dyn QueueStore> = match std::env::var("TOUCH_REDIS_URL") {
        Ok(url) => {
            println!("   └─ Queue store: Redis at {}", url);
            let store = RedisQueueStore::with_prefix(&url, Some("demo:"), Duration::from_secs(30)).await?;
            store.install_scanner().await?;
            let mut conn = store.connection();
            for (stage, uid, sub) in staged {
                let list = format!("demo:{}", stage.default_list_key());
                let _: () = conn.del(&list).await?;
                for i in 0..45 {
                    let _: i64 = conn.rpush(&list, filler(stage, i).to_json()?).await?;
                }
                let _: i64 = conn.rpush(&list, entry(uid, sub).to_json()?).await?;
            }
            Arc::new(store)
        }
        Err(_) => {
            println!("   └─ Queue store: in-memory");
            let store = InMemoryQueueStore::new();
            for (stage, uid, sub) in staged {
                let list = stage.default_list_key();
                for i in 0..45 {
                    store.push(list, &filler(stage, i))?;
                }
                store.push(list, &entry(uid, sub))?;
            }
            Arc::new(store)
        }
    };
    for (stage, uid, _) in staged {
        println!("   └─ {}: {} (behind 45 other touches)", stage, uid);
    }

    let resolver = TouchResolver::new(owners, queues, ResolverConfig::default());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Resolve each touch
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔍 Resolving touches...");

    let lookups = [
        "tch_persisted01",
        "tch_pendingsend",
        "tch_pendinglog0",
        "tch_purgatory01",
        "tch_justwritten",
        "tch_doesnotexist",
    ];
    for uid in lookups {
        let start = std::time::Instant::now();
        let res = resolver.resolve(uid).await?;
        let elapsed = start.elapsed();
        match (&res.user_sub, res.tier) {
            (Some(sub), Some(tier)) => println!(
                "   └─ {} → {} via {} ({} tiers, {:?})",
                uid, sub, tier, res.tiers_consulted, elapsed
            ),
            _ => println!(
                "   └─ {} → not found ({} tiers, {:?})",
                uid, res.tiers_consulted, elapsed
            ),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Metrics:");
    dump_metrics(&snapshotter);

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

fn entry(uid: &str, sub: &str) -> QueueEntry {
    QueueEntry::new(uid, sub)
        .with_field("channel", json!("push"))
        .with_field("message", json!({"title": "Time to meditate"}))
}

fn filler(stage: QueueStage, i: usize) -> QueueEntry {
    entry(&format!("tch_{}_{:04}", stage.stage().as_str().replace('-', ""), i), "user_other")
}

/// Dump captured counters and histograms, sorted by name
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = Vec::new();
    let mut histograms = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((key.name().to_string(), label_str, v)),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((key.name().to_string(), label_str, count, sum));
            }
            DebugValue::Gauge(_) => {}
        }
    }

    counters.sort();
    histograms.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, labels, value) in &counters {
            println!("   │  └─ {}{} = {}", name, labels, value);
        }
    }
    if !histograms.is_empty() {
        println!("   └─ Histograms (distributions)");
        for (name, labels, count, sum) in &histograms {
            let avg = if *count > 0 { sum / *count as f64 } else { 0.0 };
            println!("      └─ {}{} count={} avg={:.6}s", name, labels, count, avg);
        }
    }
    if counters.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
