//! # Summary Builder
//!
//! Collapses the [`crate::latency::LatencyReservoir`] and
//! [`crate::result_sink::ResultSink`] state accumulated over a run into
//! global and per-endpoint summary objects for external reporting.

use crate::result_sink::ResultSink;
use serde::Serialize;
use std::time::Duration;

/// Percentile/count summary for one endpoint, omitting the RPS
/// projection (which only makes sense at the run level).
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSummary {
    pub endpoint_key: String,
    pub successful: u64,
    pub failed: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
    pub status_counters: std::collections::HashMap<u16, u64>,
}

/// The run-wide summary produced when the Controller stops.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
    pub actual_rps: f64,
    pub theoretical_max_requests: f64,
    pub achieved_percentage: f64,
    pub endpoints: Vec<EndpointSummary>,
}

/// Derives a [`RunSummary`] from the sink's accumulated state.
///
/// `configured_duration` and `target_rps` are the resolved run parameters
/// (not wall-clock elapsed time), matching `actualRps = total / durationSec`.
pub fn build(
    sink: &ResultSink,
    configured_duration: Duration,
    target_rps: f64,
    ramp_up: Duration,
) -> RunSummary {
    let (successful, failed) = sink.global_counts();
    let total = successful + failed;
    let duration_secs = configured_duration.as_secs_f64().max(1e-9);

    let global = sink.with_global_histogram(|h| h.snapshot());
    let actual_rps = total as f64 / duration_secs;

    let ramp_secs = ramp_up.as_secs_f64().min(duration_secs);
    let steady_secs = (duration_secs - ramp_secs).max(0.0);
    let theoretical_max_requests = 0.5 * ramp_secs * target_rps + steady_secs * target_rps;
    let achieved_percentage = if theoretical_max_requests > 0.0 {
        100.0 * total as f64 / theoretical_max_requests
    } else {
        0.0
    };

    let endpoints = sink
        .endpoint_keys()
        .into_iter()
        .filter_map(|key| {
            sink.with_endpoint(&key, |stats| {
                let snap = stats.histogram.snapshot();
                EndpointSummary {
                    endpoint_key: key.clone(),
                    successful: stats.successful,
                    failed: stats.failed,
                    avg_latency_ms: snap.mean_ms,
                    min_latency_ms: snap.min_ms,
                    max_latency_ms: snap.max_ms,
                    p95_latency_ms: snap.p95_ms,
                    p99_latency_ms: snap.p99_ms,
                    status_counters: stats.status_counters.clone(),
                }
            })
        })
        .collect();

    RunSummary {
        total_requests: total,
        successful,
        failed,
        avg_latency_ms: global.mean_ms,
        min_latency_ms: global.min_ms,
        max_latency_ms: global.max_ms,
        p50_latency_ms: global.p50_ms,
        p95_latency_ms: global.p95_ms,
        p99_latency_ms: global.p99_ms,
        actual_rps,
        theoretical_max_requests,
        achieved_percentage,
        endpoints,
    }
}
