//! # Metrics Collector
//!
//! The teacher's original metrics module leaned on a process-wide
//! singleton collector. Here the collector is injected instead: the
//! Controller owns an `Arc<dyn MetricsCollector>` and passes it by
//! reference to the worker pool, so tests can construct a private,
//! in-memory collector rather than reaching into global state.

use std::collections::HashMap;
use std::sync::Mutex;

/// Operational (not domain-level — see [`crate::result_sink::ResultSink`]
/// for that) counters: what the run *did*, independent of what it
/// measured. Implementations must be cheap to call from the hot path.
pub trait MetricsCollector: Send + Sync {
    fn record_request(&self, endpoint_key: &str, status: u16, success: bool);
    fn record_limiter_error(&self, endpoint_key: &str);
    fn record_worker_count(&self, active_workers: usize);
}

/// The default collector: discards everything. Used whenever a run isn't
/// explicitly wired up with an observability backend.
pub struct NoopMetricsCollector;

impl MetricsCollector for NoopMetricsCollector {
    fn record_request(&self, _endpoint_key: &str, _status: u16, _success: bool) {}
    fn record_limiter_error(&self, _endpoint_key: &str) {}
    fn record_worker_count(&self, _active_workers: usize) {}
}

#[derive(Default)]
struct InMemoryState {
    requests_by_endpoint: HashMap<String, u64>,
    limiter_errors_by_endpoint: HashMap<String, u64>,
    worker_count_samples: Vec<usize>,
}

/// An in-process collector, primarily for tests: records everything it's
/// told without exporting anywhere.
#[derive(Default)]
pub struct InMemoryMetricsCollector {
    state: Mutex<InMemoryState>,
}

impl InMemoryMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests_for(&self, endpoint_key: &str) -> u64 {
        *self
            .state
            .lock()
            .unwrap()
            .requests_by_endpoint
            .get(endpoint_key)
            .unwrap_or(&0)
    }

    pub fn total_requests(&self) -> u64 {
        self.state.lock().unwrap().requests_by_endpoint.values().sum()
    }

    pub fn limiter_errors_for(&self, endpoint_key: &str) -> u64 {
        *self
            .state
            .lock()
            .unwrap()
            .limiter_errors_by_endpoint
            .get(endpoint_key)
            .unwrap_or(&0)
    }

    pub fn worker_count_samples(&self) -> Vec<usize> {
        self.state.lock().unwrap().worker_count_samples.clone()
    }
}

impl MetricsCollector for InMemoryMetricsCollector {
    fn record_request(&self, endpoint_key: &str, _status: u16, _success: bool) {
        let mut state = self.state.lock().unwrap();
        *state.requests_by_endpoint.entry(endpoint_key.to_string()).or_insert(0) += 1;
    }

    fn record_limiter_error(&self, endpoint_key: &str) {
        let mut state = self.state.lock().unwrap();
        *state
            .limiter_errors_by_endpoint
            .entry(endpoint_key.to_string())
            .or_insert(0) += 1;
    }

    fn record_worker_count(&self, active_workers: usize) {
        self.state.lock().unwrap().worker_count_samples.push(active_workers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_requests_per_endpoint() {
        let collector = InMemoryMetricsCollector::new();
        collector.record_request("GET /a", 200, true);
        collector.record_request("GET /a", 500, false);
        collector.record_request("GET /b", 200, true);
        assert_eq!(collector.requests_for("GET /a"), 2);
        assert_eq!(collector.total_requests(), 3);
    }

    #[test]
    fn noop_collector_does_nothing_observable() {
        let collector = NoopMetricsCollector;
        collector.record_request("GET /a", 200, true);
        collector.record_limiter_error("GET /a");
        collector.record_worker_count(3);
    }
}
