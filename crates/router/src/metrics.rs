//! Observability metrics exposed via Prometheus using the `metrics` crate.
//!
//! ## Metric Naming Conventions
//!
//! All metrics follow the pattern: `tagindex_{subsystem}_{name}_{unit}`
//!
//! - Counters: `_total` suffix
//! - Histograms: `_seconds` or `_size` suffix
//! - Gauges: no suffix

use tagindex_types::IndexKind;

use metrics::{counter, gauge, histogram};

// =============================================================================
// Metric Names (constants for consistency)
// =============================================================================

// Dispatch pool metrics
const DISPATCH_JOBS_TOTAL: &str = "tagindex_dispatch_jobs_total";
const DISPATCH_REJECTED_TOTAL: &str = "tagindex_dispatch_rejected_total";
const DISPATCH_RETRIES_TOTAL: &str = "tagindex_dispatch_retries_total";
const DISPATCH_QUEUE_DEPTH: &str = "tagindex_dispatch_queue_depth";
const DISPATCH_LATENCY: &str = "tagindex_dispatch_latency_seconds";

// Routing metrics
const FANOUT_WRITES_TOTAL: &str = "tagindex_fanout_writes_total";
const FANOUT_BATCH_SIZE: &str = "tagindex_fanout_batch_size";
const QUERIES_TOTAL: &str = "tagindex_queries_total";
const QUERY_LATENCY: &str = "tagindex_query_latency_seconds";
const SHARD_UNRESOLVED_TOTAL: &str = "tagindex_shard_unresolved_total";

// Shard-side metrics
const SCAN_ADVANCED: &str = "tagindex_scan_advanced_size";
const SCAN_FETCH_EXCEEDED_TOTAL: &str = "tagindex_scan_fetch_exceeded_total";
const DELTAS_APPLIED_TOTAL: &str = "tagindex_deltas_applied_total";

/// Histogram buckets for shard call latency, in seconds.
pub const LATENCY_BUCKETS: [f64; 10] = [0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

// =============================================================================
// Dispatch Pool Metrics
// =============================================================================

/// Records a finished fan-out job.
#[inline]
pub fn record_dispatch_job(success: bool, latency_secs: f64) {
    let status = if success { "success" } else { "error" };
    counter!(DISPATCH_JOBS_TOTAL, "status" => status).increment(1);
    histogram!(DISPATCH_LATENCY, "status" => status).record(latency_secs);
}

/// Records a job dropped because the queue was full.
#[inline]
pub fn record_dispatch_rejected() {
    counter!(DISPATCH_REJECTED_TOTAL).increment(1);
}

/// Records one retry of a fan-out job.
#[inline]
pub fn record_dispatch_retry() {
    counter!(DISPATCH_RETRIES_TOTAL).increment(1);
}

/// Sets the number of queued and running jobs.
#[inline]
pub fn set_dispatch_queue_depth(depth: usize) {
    gauge!(DISPATCH_QUEUE_DEPTH).set(depth as f64);
}

// =============================================================================
// Routing Metrics
// =============================================================================

/// Records the jobs produced by one fan-out write.
#[inline]
pub fn record_fanout_write(kind: IndexKind, jobs: usize) {
    counter!(FANOUT_WRITES_TOTAL, "kind" => kind.as_str()).increment(jobs as u64);
    histogram!(FANOUT_BATCH_SIZE, "kind" => kind.as_str()).record(jobs as f64);
}

/// Records a routed query.
#[inline]
pub fn record_query(kind: IndexKind, success: bool, latency_secs: f64) {
    let status = if success { "success" } else { "error" };
    counter!(QUERIES_TOTAL, "kind" => kind.as_str(), "status" => status).increment(1);
    histogram!(QUERY_LATENCY, "kind" => kind.as_str()).record(latency_secs);
}

/// Records an assignment that found no configured node.
#[inline]
pub fn record_shard_unresolved(kind: IndexKind) {
    counter!(SHARD_UNRESOLVED_TOTAL, "kind" => kind.as_str()).increment(1);
}

// =============================================================================
// Shard-side Metrics
// =============================================================================

/// Records the cursor advances of one scan call.
#[inline]
pub fn record_scan(kind: IndexKind, advanced: u32, fetch_exceeded: bool) {
    histogram!(SCAN_ADVANCED, "kind" => kind.as_str()).record(f64::from(advanced));
    if fetch_exceeded {
        counter!(SCAN_FETCH_EXCEEDED_TOTAL, "kind" => kind.as_str()).increment(1);
    }
}

/// Records an applied index delta.
#[inline]
pub fn record_delta(kind: IndexKind, committed: bool) {
    let outcome = if committed { "committed" } else { "noop" };
    counter!(DELTAS_APPLIED_TOTAL, "kind" => kind.as_str(), "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Recording without an installed recorder is a no-op and must not panic.
    #[test]
    fn test_recording_without_recorder() {
        record_dispatch_job(true, 0.01);
        record_dispatch_rejected();
        record_dispatch_retry();
        set_dispatch_queue_depth(3);
        record_fanout_write(IndexKind::Index, 2);
        record_query(IndexKind::FullText, false, 0.2);
        record_shard_unresolved(IndexKind::Manifest);
        record_scan(IndexKind::Index, 10, true);
        record_delta(IndexKind::Index, false);
    }

    #[test]
    fn test_buckets_ascending() {
        assert!(LATENCY_BUCKETS.windows(2).all(|w| w[0] < w[1]));
    }
}
