//! # Worker
//!
//! A worker is a cooperative task. It suspends at exactly two points: (a)
//! awaiting a rate-limit grant from the [`crate::rate_limiter::RateLimiterRegistry`],
//! and (b) awaiting an HTTP response. Both are ordinary `.await` points on
//! cancellable futures — aborting the task at either one frees its
//! connection or removes its queue waiter cleanly.
//!
//! Workers never talk to each other directly. Everything shared — the
//! template list, the limiter, the sink, the HTTP client, and the
//! worker-count/target-RPS the batch-size heuristic reads — lives behind
//! [`RunShared`], owned by the [`crate::controller::Controller`].

use crate::metrics::MetricsCollector;
use crate::model::{EndpointKey, RequestResult, RequestTemplate};
use crate::rate_limiter::RateLimiterRegistry;
use crate::result_sink::ResultSink;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::debug;

const MAX_BATCH_SIZE: usize = 50;

/// State shared by every worker in a run, owned by the Controller.
pub struct RunShared {
    pub templates: Vec<Arc<RequestTemplate>>,
    pub global_headers: HashMap<String, String>,
    pub registry: Arc<RateLimiterRegistry>,
    pub sink: Arc<ResultSink>,
    pub client: reqwest::Client,
    pub concurrent_requests: Option<usize>,
    pub active_workers: AtomicUsize,
    effective_target_rps_bits: AtomicU64,
    results_tx: mpsc::UnboundedSender<RequestResult>,
    pub metrics: Arc<dyn MetricsCollector>,
}

impl RunShared {
    pub fn new(
        templates: Vec<Arc<RequestTemplate>>,
        global_headers: HashMap<String, String>,
        registry: Arc<RateLimiterRegistry>,
        sink: Arc<ResultSink>,
        client: reqwest::Client,
        concurrent_requests: Option<usize>,
        results_tx: mpsc::UnboundedSender<RequestResult>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        Self {
            templates,
            global_headers,
            registry,
            sink,
            client,
            concurrent_requests,
            active_workers: AtomicUsize::new(0),
            effective_target_rps_bits: AtomicU64::new(0f64.to_bits()),
            results_tx,
            metrics,
        }
    }

    pub fn set_effective_target_rps(&self, target: f64) {
        self.effective_target_rps_bits.store(target.to_bits(), Ordering::SeqCst);
    }

    pub fn effective_target_rps(&self) -> f64 {
        f64::from_bits(self.effective_target_rps_bits.load(Ordering::SeqCst))
    }

    fn batch_size(&self) -> usize {
        if let Some(n) = self.concurrent_requests {
            return n.max(1);
        }
        let active = self.active_workers.load(Ordering::SeqCst).max(1) as f64;
        let target = self.effective_target_rps();
        let per_worker = (target / active).max(0.0);
        (per_worker.ceil() as usize).clamp(1, MAX_BATCH_SIZE)
    }

    fn pick_template(&self) -> Arc<RequestTemplate> {
        use rand::Rng;
        let idx = rand::thread_rng().gen_range(0..self.templates.len());
        self.templates[idx].clone()
    }
}

/// Runs the worker loop until `stop_rx` reports a stop or the sink's
/// early-exit predicate trips.
pub async fn run(shared: Arc<RunShared>, stop_rx: watch::Receiver<bool>) {
    shared.active_workers.fetch_add(1, Ordering::SeqCst);

    loop {
        if *stop_rx.borrow() || shared.sink.is_tripped() {
            break;
        }

        let batch_size = shared.batch_size();
        let mut set = JoinSet::new();
        for _ in 0..batch_size {
            let template = shared.pick_template();
            let shared = shared.clone();
            set.spawn(async move { dispatch_one(&shared, &template).await });
        }

        while let Some(outcome) = set.join_next().await {
            match outcome {
                Ok(result) => {
                    shared.sink.record(&result);
                    let _ = shared.results_tx.send(result);
                }
                Err(e) => debug!(error = %e, "request task panicked or was cancelled"),
            }
        }

        // Explicit yield, per the worker loop contract: re-entering the
        // loop always gives the scheduler a chance to run other tasks.
        tokio::task::yield_now().await;
    }

    shared.active_workers.fetch_sub(1, Ordering::SeqCst);
}

async fn dispatch_one(shared: &RunShared, template: &RequestTemplate) -> RequestResult {
    let endpoint_key: EndpointKey = template.endpoint_key.clone();

    if let Err(e) = shared.registry.acquire(&endpoint_key, 1).await {
        shared.metrics.record_limiter_error(endpoint_key.as_str());
        return RequestResult::failure(template, 0, e.to_string());
    }

    let mut request = shared
        .client
        .request(template.method.clone(), template.url.clone());
    for (name, value) in merge_headers(&shared.global_headers, &template.headers) {
        request = request.header(name, value);
    }
    if let Some(body) = &template.body {
        request = request.json(body);
    }

    let start = Instant::now();
    let result = match request.send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            let body_text = response.text().await.unwrap_or_default();
            let latency_ms = start.elapsed().as_millis() as u64;
            RequestResult {
                method: template.method.to_string(),
                url: template.url.to_string(),
                endpoint_key: endpoint_key.as_str().to_string(),
                status,
                latency_ms,
                success: (200..300).contains(&status),
                error: None,
                sampled_body: if body_text.is_empty() { None } else { Some(body_text) },
                completed_at_ms: RequestResult::now_ms(),
            }
        }
        Err(e) => {
            let latency_ms = start.elapsed().as_millis() as u64;
            RequestResult::failure(template, latency_ms, e.to_string())
        }
    };
    shared
        .metrics
        .record_request(endpoint_key.as_str(), result.status, result.success);
    result
}

/// Merges global and per-request headers case-insensitively; per-request
/// values replace global values key-for-key.
fn merge_headers(
    global: &HashMap<String, String>,
    per_request: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let mut merged: HashMap<String, (String, String)> = HashMap::new();
    for (k, v) in global {
        merged.insert(k.to_lowercase(), (k.clone(), v.clone()));
    }
    for (k, v) in per_request {
        merged.insert(k.to_lowercase(), (k.clone(), v.clone()));
    }
    merged.into_values().collect()
}
