//! # HTTP Client
//!
//! Builds the single `reqwest::Client` shared by every worker in a run.
//! One client per run means one connection pool per origin, keyed by
//! scheme+host+port, exactly as described in the concurrency model's
//! "Shared resources" section.

use crate::error::SurgeError;
use std::time::Duration;

/// Connection pool and timeout configuration for the shared HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub max_connections_per_host: usize,
    pub headers_timeout: Duration,
    pub body_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 1024,
            headers_timeout: Duration::from_secs(30),
            body_timeout: Duration::from_secs(30),
        }
    }
}

/// Constructs the shared client. Fails with [`SurgeError::Fatal`] if the
/// TLS backend can't be initialized — a run never starts without one.
pub fn build_client(config: &HttpClientConfig) -> Result<reqwest::Client, SurgeError> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(config.max_connections_per_host)
        .timeout(config.headers_timeout + config.body_timeout)
        .connect_timeout(config.headers_timeout)
        .build()
        .map_err(|e| SurgeError::Fatal(format!("failed to construct HTTP client: {e}")))
}
