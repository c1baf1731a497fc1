//! # Core Data Model
//!
//! Runtime entities shared across the rate limiter, worker pool, result
//! sink, and summary builder. These are distinct from the wire-format
//! structs in [`crate::config`]: a [`RequestTemplateConfig`](crate::config::RequestTemplateConfig)
//! is what a caller hands in; a [`RequestTemplate`] is what [`crate::worker::run`]
//! actually dispatches, with the URL and method already parsed and validated.

use crate::config::RequestTemplateConfig;
use crate::error::SurgeError;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Deterministic identity of an endpoint: `METHOD SP URL`.
///
/// Used as the keying dimension for rate limiting, histograms, and status
/// counters. Two request templates with the same method and URL collapse
/// onto the same endpoint for every purpose in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EndpointKey(String);

impl EndpointKey {
    pub fn new(method: &reqwest::Method, url: &str) -> Self {
        EndpointKey(format!("{} {}", method, url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fully-resolved request template, ready for a worker to dispatch.
///
/// Immutable after load: workers hold a shared, read-only `Arc<[RequestTemplate]>`
/// and never mutate a template while the run is in progress.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub method: reqwest::Method,
    pub url: reqwest::Url,
    pub body: Option<serde_json::Value>,
    pub headers: HashMap<String, String>,
    /// Per-template target RPS, if the config specified one.
    pub target_rps: Option<f64>,
    pub endpoint_key: EndpointKey,
}

impl RequestTemplate {
    pub fn from_config(cfg: &RequestTemplateConfig) -> Result<Self, SurgeError> {
        let method = cfg.method.as_reqwest_method();
        let url = reqwest::Url::parse(&cfg.url).map_err(|e| {
            SurgeError::single_validation("url", format!("invalid absolute URL: {e}"))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SurgeError::single_validation(
                "url",
                "URL must use the http or https scheme",
            ));
        }
        let endpoint_key = EndpointKey::new(&method, cfg.url.as_str());
        Ok(Self {
            method,
            url,
            body: cfg.payload.clone(),
            headers: cfg.headers.clone(),
            target_rps: cfg.target_rps,
            endpoint_key,
        })
    }
}

/// The outcome of a single dispatched request.
///
/// `status == 0` signals a transport-level or rate-limiter failure rather
/// than an HTTP response; `success` is `true` iff `200 <= status < 300`.
#[derive(Debug, Clone, Serialize)]
pub struct RequestResult {
    pub method: String,
    pub url: String,
    pub endpoint_key: String,
    /// HTTP status code, or `0` on transport/limiter error.
    pub status: u16,
    pub latency_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    /// At most one sampled body is retained per (endpoint, status) pair;
    /// see [`crate::result_sink::ResultSink`].
    pub sampled_body: Option<String>,
    pub completed_at_ms: u64,
}

impl RequestResult {
    pub fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    pub fn failure(
        template: &RequestTemplate,
        latency_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            method: template.method.to_string(),
            url: template.url.to_string(),
            endpoint_key: template.endpoint_key.as_str().to_string(),
            status: 0,
            latency_ms,
            success: false,
            error: Some(error.into()),
            sampled_body: None,
            completed_at_ms: Self::now_ms(),
        }
    }
}
