//! # Controller
//!
//! Owns the worker pool, drives ramp-up, runs the autoscaler, enforces
//! total run duration, and performs ordered shutdown.
//!
//! ```text
//! Idle ──start()──> Running ──duration elapsed, explicit stop,──> Stopping ──all workers joined──> Stopped
//!                              or early-exit signal
//! ```

use crate::config::RunConfig;
use crate::http_client;
use crate::model::RequestResult;
use crate::rate_limiter::RateLimiterRegistry;
use crate::result_sink::{EarlyExitConfig, ResultSink};
use crate::worker::{self, RunShared};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

const AUTOSCALE_INTERVAL: Duration = Duration::from_secs(2);
const RAMP_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
const AVG_RPS_PER_WORKER_FLOOR: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// The result of a completed run: the summary plus the raw result stream
/// for external exporters.
pub struct RunOutcome {
    pub summary: crate::summary::RunSummary,
    pub results: Vec<RequestResult>,
}

pub struct Controller {
    shared: Arc<RunShared>,
    stop_tx: watch::Sender<bool>,
    results_rx: mpsc::UnboundedReceiver<RequestResult>,
    max_workers: usize,
    autoscale: bool,
    ramp_up: Duration,
    duration: Duration,
    target_rps: f64,
    shutdown_watchdog: Duration,
    state: std::sync::Mutex<ControllerState>,
}

impl Controller {
    pub fn new(
        config: &RunConfig,
        templates: Vec<Arc<crate::model::RequestTemplate>>,
    ) -> Result<Self, crate::error::SurgeError> {
        Self::new_with_metrics(
            config,
            templates,
            Arc::new(crate::metrics::NoopMetricsCollector),
        )
    }

    /// Same as [`Self::new`], but with an injected metrics collector
    /// passed by reference down to the worker pool — tests construct a
    /// private [`crate::metrics::InMemoryMetricsCollector`] instead of
    /// reaching into global state.
    pub fn new_with_metrics(
        config: &RunConfig,
        templates: Vec<Arc<crate::model::RequestTemplate>>,
        metrics: Arc<dyn crate::metrics::MetricsCollector>,
    ) -> Result<Self, crate::error::SurgeError> {
        let client = http_client::build_client(&http_client::HttpClientConfig::default())?;
        let registry = Arc::new(RateLimiterRegistry::new());
        configure_registry(&registry, config, &templates);

        let early_exit = if config.early_exit_on_error {
            EarlyExitConfig {
                error_rate_threshold: config.error_rate_threshold,
                error_count_threshold: config.error_count_threshold,
                error_status_codes: config
                    .error_status_codes
                    .as_ref()
                    .map(|codes| codes.iter().copied().collect::<HashSet<u16>>()),
            }
        } else {
            EarlyExitConfig::default()
        };
        let sink = Arc::new(ResultSink::new(early_exit));

        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(RunShared::new(
            templates.clone(),
            config.headers.clone(),
            registry,
            sink,
            client,
            config.concurrent_requests,
            results_tx,
            metrics,
        ));

        let target_rps = resolve_target_rps(config, &templates);
        shared.set_effective_target_rps(if config.ramp_up_time == 0 { target_rps } else { 0.0 });

        let (stop_tx, _) = watch::channel(false);
        let headers_timeout = Duration::from_secs(30);
        let body_timeout = Duration::from_secs(30);

        Ok(Self {
            shared,
            stop_tx,
            results_rx,
            max_workers: config.workers.max(1),
            autoscale: config.autoscale,
            ramp_up: Duration::from_secs(config.ramp_up_time),
            duration: Duration::from_secs(config.duration),
            target_rps,
            shutdown_watchdog: headers_timeout + body_timeout + Duration::from_secs(1),
            state: std::sync::Mutex::new(ControllerState::Idle),
        })
    }

    fn set_state(&self, state: ControllerState) {
        *self.state.lock().unwrap() = state;
        info!(?state, "controller state transition");
    }

    pub fn state(&self) -> ControllerState {
        *self.state.lock().unwrap()
    }

    fn spawn_worker(&self) -> JoinHandle<()> {
        tokio::spawn(worker::run(self.shared.clone(), self.stop_tx.subscribe()))
    }

    /// Drives the run to completion: ramp-up, autoscaling, duration
    /// enforcement, and ordered shutdown. Consumes the Controller.
    pub async fn run(mut self) -> RunOutcome {
        self.set_state(ControllerState::Running);

        let initial_workers = if self.autoscale { 1 } else { self.max_workers };
        let mut handles: Vec<JoinHandle<()>> = (0..initial_workers).map(|_| self.spawn_worker()).collect();

        let started = Instant::now();
        let deadline = started + self.duration;
        let mut ramp_interval = tokio::time::interval(RAMP_SAMPLE_INTERVAL);
        let mut autoscale_interval = tokio::time::interval(AUTOSCALE_INTERVAL);

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                _ = self.shared.sink.wait_for_trip() => break,
                _ = ramp_interval.tick() => {
                    self.advance_ramp(started.elapsed());
                }
                _ = autoscale_interval.tick(), if self.autoscale => {
                    self.adjust_workers(&mut handles).await;
                }
            }
        }

        self.shutdown(handles).await;
        self.set_state(ControllerState::Stopped);

        let results = self.drain_results();
        let summary = crate::summary::build(&self.shared.sink, started.elapsed(), self.target_rps, self.ramp_up);
        RunOutcome { summary, results }
    }

    fn advance_ramp(&self, elapsed: Duration) {
        let effective = if self.ramp_up.is_zero() {
            self.target_rps
        } else {
            let fraction = (elapsed.as_secs_f64() / self.ramp_up.as_secs_f64()).min(1.0);
            self.target_rps * fraction
        };
        self.shared.set_effective_target_rps(effective);
    }

    async fn adjust_workers(&self, handles: &mut Vec<JoinHandle<()>>) {
        self.shared
            .metrics
            .record_worker_count(self.shared.active_workers.load(Ordering::SeqCst));
        let actual = self.shared.sink.with_global_histogram(|h| h.current_rps()) as f64;
        let target = self.shared.effective_target_rps();
        let active = self.shared.active_workers.load(Ordering::SeqCst).max(1);
        // The floor only guards the case where active/observed throughput is
        // effectively zero (e.g. the first tick after spawning a single
        // worker); with more than one worker already running, the observed
        // ratio is real signal and must drive the step size unscaled.
        let avg_per_worker = if active <= 1 {
            (actual / active as f64).max(AVG_RPS_PER_WORKER_FLOOR)
        } else {
            (actual / active as f64).max(1e-6)
        };

        if actual < 0.9 * target && active < self.max_workers {
            let raw = (0.25 * (target - actual) / avg_per_worker).ceil().max(1.0) as usize;
            let add = raw.min(self.max_workers - active);
            for _ in 0..add {
                handles.push(self.spawn_worker());
            }
            info!(add, active_after = active + add, target, actual, "autoscaler scaled up");
        } else if actual > 1.1 * target && active > 1 {
            let raw = (0.25 * (actual - target) / avg_per_worker).ceil().max(1.0) as usize;
            let remove = raw.min(active - 1);
            for _ in 0..remove {
                if let Some(h) = handles.pop() {
                    h.abort();
                }
            }
            info!(remove, active_after = active.saturating_sub(remove), target, actual, "autoscaler scaled down");
        }
    }

    async fn shutdown(&self, mut handles: Vec<JoinHandle<()>>) {
        self.set_state(ControllerState::Stopping);
        let _ = self.stop_tx.send(true);

        let joined = tokio::time::timeout(self.shutdown_watchdog, join_all(&mut handles)).await;
        if joined.is_err() {
            warn!("shutdown watchdog expired; forcibly cancelling remaining workers");
            for h in &handles {
                if !h.is_finished() {
                    h.abort();
                }
            }
        }
        self.shared.registry.clear_all();
    }

    fn drain_results(&mut self) -> Vec<RequestResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.results_rx.try_recv() {
            results.push(result);
        }
        results
    }
}

async fn join_all(handles: &mut [JoinHandle<()>]) {
    for h in handles.iter_mut() {
        let _ = h.await;
    }
}

fn resolve_target_rps(config: &RunConfig, templates: &[Arc<crate::model::RequestTemplate>]) -> f64 {
    if let Some(rps) = config.rps {
        return rps as f64;
    }
    templates.iter().map(|t| t.target_rps.unwrap_or(100.0)).sum()
}

fn configure_registry(
    registry: &RateLimiterRegistry,
    config: &RunConfig,
    templates: &[Arc<crate::model::RequestTemplate>],
) {
    let unconfigured_count = templates.iter().filter(|t| t.target_rps.is_none()).count().max(1);
    let global_share = config.rps.map(|r| r as f64 / unconfigured_count as f64);

    for template in templates {
        if let Some(r) = template.target_rps {
            let capacity = (2.0f64.max(2.0 * r)).ceil() as u64;
            registry.configure(&template.endpoint_key, capacity, r);
        } else if let Some(share) = global_share {
            let capacity = (2.0f64.max(2.0 * share)).ceil() as u64;
            registry.configure(&template.endpoint_key, capacity, share);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::model::RequestTemplate;

    fn templates_from(cfg: &RunConfig) -> Vec<Arc<RequestTemplate>> {
        cfg.requests
            .iter()
            .map(|r| Arc::new(RequestTemplate::from_config(r).unwrap()))
            .collect()
    }

    #[test]
    fn target_rps_resolution_prefers_global_rps() {
        let cfg = RunConfig::from_json_str(
            r#"{ "requests": [ { "url": "http://h/a" } ], "rps": 42 }"#,
        )
        .unwrap();
        let templates = templates_from(&cfg);
        assert_eq!(resolve_target_rps(&cfg, &templates), 42.0);
    }

    #[test]
    fn target_rps_resolution_sums_per_template_defaults() {
        let cfg = RunConfig::from_json_str(
            r#"{ "requests": [ { "url": "http://h/a" }, { "url": "http://h/b", "targetRps": 5 } ] }"#,
        )
        .unwrap();
        let templates = templates_from(&cfg);
        assert_eq!(resolve_target_rps(&cfg, &templates), 105.0); // 100 default + 5
    }

    fn synthetic_result() -> RequestResult {
        RequestResult {
            method: "GET".into(),
            url: "http://h/a".into(),
            endpoint_key: "GET http://h/a".into(),
            status: 200,
            latency_ms: 5,
            success: true,
            error: None,
            sampled_body: None,
            completed_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn advance_ramp_progresses_target_rps_linearly() {
        let cfg = RunConfig::from_json_str(
            r#"{ "requests": [ { "url": "http://h/a" } ], "rps": 100, "rampUpTime": 10, "workers": 1 }"#,
        )
        .unwrap();
        let templates = templates_from(&cfg);
        let controller = Controller::new(&cfg, templates).unwrap();

        controller.advance_ramp(Duration::from_secs(0));
        assert_eq!(controller.shared.effective_target_rps(), 0.0);

        controller.advance_ramp(Duration::from_secs(5));
        assert!((controller.shared.effective_target_rps() - 50.0).abs() < 1e-9);

        controller.advance_ramp(Duration::from_secs(10));
        assert_eq!(controller.shared.effective_target_rps(), 100.0);

        // past the ramp window, the target clamps rather than overshooting.
        controller.advance_ramp(Duration::from_secs(20));
        assert_eq!(controller.shared.effective_target_rps(), 100.0);
    }

    #[tokio::test]
    async fn adjust_workers_scales_up_when_under_target() {
        let cfg = RunConfig::from_json_str(
            r#"{ "requests": [ { "url": "http://127.0.0.1:1/unreachable" } ], "rps": 100, "workers": 8, "autoscale": true }"#,
        )
        .unwrap();
        let templates = templates_from(&cfg);
        let controller = Controller::new(&cfg, templates).unwrap();
        controller.shared.set_effective_target_rps(100.0);
        controller.shared.active_workers.store(1, Ordering::SeqCst);

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        controller.adjust_workers(&mut handles).await;

        assert!(!handles.is_empty(), "autoscaler should add workers when far under target");
        assert!(handles.len() <= controller.max_workers - 1);
        for h in &handles {
            h.abort();
        }
    }

    #[tokio::test]
    async fn adjust_workers_uses_observed_per_worker_rate_once_more_than_one_worker_is_active() {
        let cfg = RunConfig::from_json_str(
            r#"{ "requests": [ { "url": "http://127.0.0.1:1/unreachable" } ], "rps": 100, "workers": 32, "autoscale": true }"#,
        )
        .unwrap();
        let templates = templates_from(&cfg);
        let controller = Controller::new(&cfg, templates).unwrap();
        controller.shared.set_effective_target_rps(100.0);
        controller.shared.active_workers.store(2, Ordering::SeqCst);
        // 10 completions in the last second at active=2 -> 5 rps/worker,
        // well below the old unconditional 10.0 floor.
        for _ in 0..10 {
            controller.shared.sink.record(&synthetic_result());
        }

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        controller.adjust_workers(&mut handles).await;

        // raw = ceil(0.25 * (100 - 10) / 5) = ceil(4.5) = 5, not the
        // ceil(0.25 * 90 / 10) = 3 the unconditional floor would have given.
        assert_eq!(handles.len(), 5);
        for h in &handles {
            h.abort();
        }
    }

    #[tokio::test]
    async fn basic_run_completes_and_reports_results() {
        std::env::set_var("SURGE_TEST_MODE", "1");
        let cfg = RunConfig::from_json_str(
            r#"{ "requests": [ { "url": "http://127.0.0.1:1/unreachable" } ], "workers": 1, "duration": 1 }"#,
        )
        .unwrap();
        let templates = templates_from(&cfg);
        let controller = Controller::new(&cfg, templates).unwrap();
        let outcome = controller.run().await;
        assert!(outcome.summary.total_requests >= 1);
        assert_eq!(outcome.results.len() as u64, outcome.summary.total_requests);
        std::env::remove_var("SURGE_TEST_MODE");
    }
}
