// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the watch cache.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `watch_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `kind`: added, modified, deleted, bookmark, replace
//! - `mode`: latest, not_older_than, exact, consistent
//! - `source`: cache, store_of_record
//! - `outcome` / `status`: success, error, timeout, ...

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// Ingestion
// ═══════════════════════════════════════════════════════════════════════════

/// Record one notification handled by the replication sink
pub fn record_ingest(kind: &str, status: &str) {
    counter!(
        "watch_cache_ingested_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record objects skipped because key/attribute extraction failed
pub fn record_extraction_failures(count: usize) {
    counter!("watch_cache_extraction_failures_total").increment(count as u64);
}

/// Set the highest revision reflected in the cache
pub fn set_current_revision(revision: u64) {
    gauge!("watch_cache_revision").set(revision as f64);
}

/// Set the number of objects in the snapshot
pub fn set_snapshot_items(count: usize) {
    gauge!("watch_cache_snapshot_items").set(count as f64);
}

/// Set cache lifecycle state
pub fn set_cache_state(state: &str) {
    gauge!(
        "watch_cache_state",
        "state" => state.to_string()
    )
    .set(1.0);
}

// ═══════════════════════════════════════════════════════════════════════════
// Event ring
// ═══════════════════════════════════════════════════════════════════════════

/// Record events dropped from the ring (capacity, freshness, resize, replace)
pub fn record_events_evicted(reason: &str, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        "watch_cache_events_evicted_total",
        "reason" => reason.to_string()
    )
    .increment(count as u64);
}

/// Record a ring capacity change
pub fn record_ring_resize(direction: &str, capacity: usize) {
    counter!(
        "watch_cache_ring_resizes_total",
        "direction" => direction.to_string()
    )
    .increment(1);
    gauge!("watch_cache_ring_capacity").set(capacity as f64);
}

/// Set ring capacity and occupancy
pub fn set_ring_gauges(capacity: usize, len: usize) {
    gauge!("watch_cache_ring_capacity").set(capacity as f64);
    gauge!("watch_cache_ring_events").set(len as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// Reads
// ═══════════════════════════════════════════════════════════════════════════

/// Record a list request and how it was answered
pub fn record_list(mode: &str, source: &str, indexed: bool) {
    counter!(
        "watch_cache_list_total",
        "mode" => mode.to_string(),
        "source" => source.to_string(),
        "indexed" => if indexed { "true" } else { "false" }
    )
    .increment(1);
}

/// Record list latency
pub fn record_list_latency(mode: &str, duration: Duration) {
    histogram!(
        "watch_cache_list_seconds",
        "mode" => mode.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a failed read by error reason
pub fn record_read_error(operation: &str, reason: &str) {
    counter!(
        "watch_cache_read_errors_total",
        "operation" => operation.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a fallback to the store of record
pub fn record_fallback(reason: &str) {
    counter!(
        "watch_cache_store_fallbacks_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a watch cursor creation
pub fn record_cursor(outcome: &str) {
    counter!(
        "watch_cache_cursors_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// Consistency gate
// ═══════════════════════════════════════════════════════════════════════════

/// Record a revision wait and how long it blocked
pub fn record_wait(outcome: &str, duration: Duration) {
    counter!(
        "watch_cache_revision_waits_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("watch_cache_revision_wait_seconds").record(duration.as_secs_f64());
}

/// Record a progress (bookmark) request against the store of record
pub fn record_progress_request(outcome: &str) {
    counter!(
        "watch_cache_progress_requests_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// A timing guard that records list latency on drop
pub struct ListTimer {
    mode: &'static str,
    start: Instant,
}

impl ListTimer {
    pub fn new(mode: &'static str) -> Self {
        Self {
            mode,
            start: Instant::now(),
        }
    }
}

impl Drop for ListTimer {
    fn drop(&mut self) {
        record_list_latency(self.mode, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These only verify the calls don't panic without an installed recorder.

    #[test]
    fn test_ingest_metrics() {
        record_ingest("added", "success");
        record_ingest("modified", "stale");
        record_extraction_failures(2);
        set_current_revision(42);
        set_snapshot_items(7);
        set_cache_state("Ready");
    }

    #[test]
    fn test_ring_metrics() {
        record_events_evicted("capacity", 1);
        record_events_evicted("freshness", 0);
        record_ring_resize("grow", 200);
        set_ring_gauges(200, 150);
    }

    #[test]
    fn test_read_metrics() {
        record_list("latest", "cache", true);
        record_list("consistent", "store_of_record", false);
        record_read_error("get", "timeout");
        record_fallback("expired");
        record_cursor("created");
    }

    #[test]
    fn test_gate_metrics() {
        record_wait("success", Duration::from_millis(3));
        record_wait("timeout", Duration::from_secs(3));
        record_progress_request("sent");
    }

    #[test]
    fn test_list_timer() {
        {
            let _timer = ListTimer::new("exact");
            std::thread::sleep(Duration::from_micros(10));
        }
    }
}
