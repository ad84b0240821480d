// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for touch-resolver.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `touch_resolver_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: db_none, db_weak, queue_pending_send, queue_pending_persist, queue_in_persist, db_strong
//! - `status`: hit, miss, error, timeout
//! - `list`: queue list key

use metrics::{counter, histogram};
use std::time::{Duration, Instant};

/// Record the outcome of one tier query
pub fn record_tier_lookup(tier: &str, status: &str) {
    counter!(
        "touch_resolver_tier_lookups_total",
        "tier" => tier.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record tier query latency
pub fn record_tier_latency(tier: &str, duration: Duration) {
    histogram!(
        "touch_resolver_tier_seconds",
        "tier" => tier.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record scan script invocations spent on one list
pub fn record_scan_invocations(list: &str, count: u64) {
    counter!(
        "touch_resolver_scan_invocations_total",
        "list" => list.to_string()
    )
    .increment(count);
}

/// Record queue entries that could not be decoded
pub fn record_skipped_entries(list: &str, count: u64) {
    counter!(
        "touch_resolver_skipped_entries_total",
        "list" => list.to_string()
    )
    .increment(count);
}

/// Record a scan script presence check or install (`present`, `loaded`, `error`)
pub fn record_script_load(status: &str) {
    counter!(
        "touch_resolver_script_loads_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record which tier answered a resolution (or `miss`)
pub fn record_resolution(outcome: &str) {
    counter!(
        "touch_resolver_resolutions_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Timer guard that records tier latency on drop
pub struct LatencyTimer {
    tier: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(tier: &'static str) -> Self {
        Self {
            tier,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_tier_latency(self.tier, self.start.elapsed());
    }
}
