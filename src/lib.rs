//! # Surge - An HTTP API Load Generator
//!
//! Surge drives configurable concurrency against a set of HTTP endpoints
//! for a bounded time window, enforcing per-endpoint rate limits, collecting
//! latency and status telemetry, and optionally terminating the run early
//! when failure signals cross operator-defined thresholds.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────────────┐     ┌─────────────┐
//! │  RunConfig   │────▶│        Controller          │────▶│  HTTP API   │
//! │ (templates,  │     │  ramp-up · autoscale ·     │     │ under test  │
//! │  thresholds) │     │  shutdown watchdog         │     └─────────────┘
//! └──────────────┘     └──────────────┬──────────────┘
//!                                     │ spawns
//!                      ┌──────────────┼──────────────┐
//!                      ▼              ▼              ▼
//!                 ┌─────────┐   ┌──────────┐   ┌───────────┐
//!                 │ Worker  │   │ Worker   │   │  Worker   │  (N of these)
//!                 └────┬────┘   └────┬─────┘   └─────┬─────┘
//!                      │             │               │
//!                      ▼             ▼               ▼
//!              RateLimiterRegistry (per-endpoint TokenBucket + ThrottlingQueue)
//!                      │
//!                      ▼
//!                  ResultSink ──▶ LatencyReservoir, status counters, early exit
//!                      │
//!                      ▼
//!                SummaryBuilder
//! ```
//!
//! ## Core Components
//!
//! - **[`controller::Controller`]** - owns the worker pool, ramp-up, autoscaling, and shutdown
//! - **[`worker`]** - the cooperative per-worker request loop
//! - **[`rate_limiter::RateLimiterRegistry`]** - keyed token-bucket + queue per endpoint
//! - **[`throttling_queue::ThrottlingQueue`]** - FIFO pacing queue in front of a bucket
//! - **[`token_bucket::TokenBucket`]** - the passive rate-limiting primitive
//! - **[`latency::LatencyReservoir`]** - HDR histograms plus an RPS ring buffer
//! - **[`result_sink::ResultSink`]** - the single mutator of run-wide counters
//! - **[`summary::SummaryBuilder`](summary)** - collapses accumulated state into a report
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use surge::config::RunConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RunConfig::from_file("run.json")?;
//!     let outcome = surge::run::execute(config).await?;
//!     println!("{:#?}", outcome.summary);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - recognized configuration keys, defaults, loading
//! - [`config_validator`] - cross-field and range validation beyond serde's shape check
//! - [`error`] - the `SurgeError` taxonomy
//! - [`model`] - runtime entities shared across components (`RequestTemplate`, `RequestResult`, `EndpointKey`)
//! - [`token_bucket`] - single-endpoint rate limiter
//! - [`throttling_queue`] - FIFO admission queue paired with a bucket
//! - [`rate_limiter`] - the keyed registry of buckets+queues
//! - [`latency`] - HDR histograms and the instantaneous-RPS ring
//! - [`result_sink`] - counters, sampling, and the early-exit predicate
//! - [`worker`] - the per-worker request loop
//! - [`controller`] - ramp-up, autoscaling, shutdown
//! - [`summary`] - the final report
//! - [`http_client`] - shared `reqwest::Client` construction
//! - [`metrics`] - injected operational metrics collector
//! - [`run`] - the single library entry point

pub mod config;
pub mod config_validator;
pub mod controller;
pub mod error;
pub mod http_client;
pub mod latency;
pub mod metrics;
pub mod model;
pub mod rate_limiter;
pub mod result_sink;
pub mod run;
pub mod summary;
pub mod throttling_queue;
pub mod token_bucket;
pub mod worker;

pub use config::RunConfig;
pub use controller::{Controller, RunOutcome};
pub use error::{LimiterError, SurgeError};
pub use summary::RunSummary;

/// Result type alias for surge operations.
pub type Result<T> = std::result::Result<T, SurgeError>;

/// Version of the surge library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
