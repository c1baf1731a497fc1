//! # Result Sink
//!
//! The single mutator of run-wide state. Every [`RequestResult`] produced
//! by [`crate::worker::run`] passes through [`ResultSink::record`],
//! which updates histograms, status counters, and the sampled-response
//! set, then evaluates the early-exit predicate.
//!
//! Serialization. All mutation happens behind one [`std::sync::Mutex`], so
//! readers of run-wide counters always observe `successful + failed ==
//! total` — there is no window where one side of the pair has been
//! updated and the other hasn't.

use crate::latency::LatencyReservoir;
use crate::model::RequestResult;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

const MAX_SAMPLED_RESPONSES: usize = 1_000;

/// The disjunctive early-exit predicate, configured per run.
#[derive(Debug, Clone, Default)]
pub struct EarlyExitConfig {
    pub error_rate_threshold: Option<f64>,
    pub error_count_threshold: Option<u64>,
    pub error_status_codes: Option<HashSet<u16>>,
}

impl EarlyExitConfig {
    pub fn is_empty(&self) -> bool {
        self.error_rate_threshold.is_none()
            && self.error_count_threshold.is_none()
            && self.error_status_codes.is_none()
    }
}

/// Per-endpoint counters and histogram.
pub struct EndpointStats {
    pub successful: u64,
    pub failed: u64,
    pub histogram: LatencyReservoir,
    pub status_counters: HashMap<u16, u64>,
    sampled_statuses: HashSet<u16>,
}

impl EndpointStats {
    fn new() -> Self {
        Self {
            successful: 0,
            failed: 0,
            histogram: LatencyReservoir::new(),
            status_counters: HashMap::new(),
            sampled_statuses: HashSet::new(),
        }
    }
}

/// A retained response body, kept at most once per (endpoint, status) pair.
#[derive(Debug, Clone)]
pub struct SampledResponse {
    pub endpoint_key: String,
    pub status: u16,
    pub body: String,
}

struct SinkState {
    global_histogram: LatencyReservoir,
    global_successful: u64,
    global_failed: u64,
    global_status_counters: HashMap<u16, u64>,
    endpoints: HashMap<String, EndpointStats>,
    sampled: Vec<SampledResponse>,
}

/// Applies every request outcome to counters, histograms, the status-code
/// map, and the sampled-response set; evaluates the early-exit predicate.
pub struct ResultSink {
    state: Mutex<SinkState>,
    early_exit: EarlyExitConfig,
    tripped: AtomicBool,
    notify: Notify,
}

impl ResultSink {
    pub fn new(early_exit: EarlyExitConfig) -> Self {
        Self {
            state: Mutex::new(SinkState {
                global_histogram: LatencyReservoir::new(),
                global_successful: 0,
                global_failed: 0,
                global_status_counters: HashMap::new(),
                endpoints: HashMap::new(),
                sampled: Vec::new(),
            }),
            early_exit,
            tripped: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn record(&self, result: &RequestResult) {
        let mut state = self.state.lock().unwrap();
        let now = std::time::Instant::now();

        state.global_histogram.record(result.latency_ms, now);
        *state.global_status_counters.entry(result.status).or_insert(0) += 1;
        if result.success {
            state.global_successful += 1;
        } else {
            state.global_failed += 1;
        }

        let endpoint = state
            .endpoints
            .entry(result.endpoint_key.clone())
            .or_insert_with(EndpointStats::new);
        endpoint.histogram.record(result.latency_ms, now);
        *endpoint.status_counters.entry(result.status).or_insert(0) += 1;
        if result.success {
            endpoint.successful += 1;
        } else {
            endpoint.failed += 1;
        }

        if let Some(body) = &result.sampled_body {
            let already_sampled = endpoint.sampled_statuses.contains(&result.status);
            if !already_sampled && state.sampled.len() < MAX_SAMPLED_RESPONSES {
                endpoint.sampled_statuses.insert(result.status);
                state.sampled.push(SampledResponse {
                    endpoint_key: result.endpoint_key.clone(),
                    status: result.status,
                    body: body.clone(),
                });
            }
        }

        let should_trip = !self.early_exit.is_empty()
            && Self::evaluate(
                &self.early_exit,
                state.global_successful,
                state.global_failed,
                &state.global_status_counters,
            );
        drop(state);

        if should_trip && !self.tripped.swap(true, Ordering::SeqCst) {
            self.notify.notify_one();
        }
    }

    fn evaluate(
        cfg: &EarlyExitConfig,
        successful: u64,
        failed: u64,
        status_counters: &HashMap<u16, u64>,
    ) -> bool {
        if let Some(threshold) = cfg.error_rate_threshold {
            let total = successful + failed;
            if total >= 1 && (failed as f64 / total as f64) >= threshold {
                return true;
            }
        }
        if let Some(threshold) = cfg.error_count_threshold {
            if failed >= threshold {
                return true;
            }
        }
        if let Some(codes) = &cfg.error_status_codes {
            for code in codes {
                if *status_counters.get(code).unwrap_or(&0) >= 1 {
                    return true;
                }
            }
        }
        false
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Suspends until the early-exit predicate trips. Returns immediately
    /// if it has already tripped.
    pub async fn wait_for_trip(&self) {
        loop {
            if self.is_tripped() {
                return;
            }
            self.notify.notified().await;
        }
    }

    pub fn global_counts(&self) -> (u64, u64) {
        let state = self.state.lock().unwrap();
        (state.global_successful, state.global_failed)
    }

    pub fn global_total(&self) -> u64 {
        let (s, f) = self.global_counts();
        s + f
    }

    pub fn with_global_histogram<T>(&self, f: impl FnOnce(&LatencyReservoir) -> T) -> T {
        let state = self.state.lock().unwrap();
        f(&state.global_histogram)
    }

    pub fn endpoint_keys(&self) -> Vec<String> {
        self.state.lock().unwrap().endpoints.keys().cloned().collect()
    }

    pub fn with_endpoint<T>(&self, key: &str, f: impl FnOnce(&EndpointStats) -> T) -> Option<T> {
        let state = self.state.lock().unwrap();
        state.endpoints.get(key).map(f)
    }

    pub fn sampled_responses(&self) -> Vec<SampledResponse> {
        self.state.lock().unwrap().sampled.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(endpoint: &str, status: u16, success: bool) -> RequestResult {
        RequestResult {
            method: "GET".into(),
            url: "http://h/x".into(),
            endpoint_key: endpoint.into(),
            status,
            latency_ms: 10,
            success,
            error: None,
            sampled_body: None,
            completed_at_ms: 0,
        }
    }

    #[test]
    fn counters_stay_consistent() {
        let sink = ResultSink::new(EarlyExitConfig::default());
        sink.record(&result("GET /a", 200, true));
        sink.record(&result("GET /a", 500, false));
        let (s, f) = sink.global_counts();
        assert_eq!(s + f, 2);
        assert_eq!(s, 1);
        assert_eq!(f, 1);
    }

    #[test]
    fn error_count_threshold_trips_once() {
        let sink = ResultSink::new(EarlyExitConfig {
            error_count_threshold: Some(1),
            ..Default::default()
        });
        assert!(!sink.is_tripped());
        sink.record(&result("GET /a", 500, false));
        assert!(sink.is_tripped());
        sink.record(&result("GET /a", 500, false));
        assert!(sink.is_tripped()); // still tripped, idempotent
    }

    #[test]
    fn error_status_code_trips() {
        let sink = ResultSink::new(EarlyExitConfig {
            error_status_codes: Some(HashSet::from([503])),
            ..Default::default()
        });
        sink.record(&result("GET /a", 200, true));
        assert!(!sink.is_tripped());
        sink.record(&result("GET /a", 503, false));
        assert!(sink.is_tripped());
    }

    #[test]
    fn sampled_body_kept_once_per_endpoint_status() {
        let sink = ResultSink::new(EarlyExitConfig::default());
        let mut r1 = result("GET /a", 200, true);
        r1.sampled_body = Some("first".into());
        let mut r2 = result("GET /a", 200, true);
        r2.sampled_body = Some("second".into());
        sink.record(&r1);
        sink.record(&r2);
        let sampled = sink.sampled_responses();
        assert_eq!(sampled.len(), 1);
        assert_eq!(sampled[0].body, "first");
    }

    #[tokio::test]
    async fn wait_for_trip_resolves_after_record() {
        let sink = std::sync::Arc::new(ResultSink::new(EarlyExitConfig {
            error_count_threshold: Some(1),
            ..Default::default()
        }));
        let waiter = sink.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_for_trip().await;
        });
        sink.record(&result("GET /a", 500, false));
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("should resolve promptly")
            .unwrap();
    }
}
