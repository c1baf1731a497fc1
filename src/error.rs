//! # Error Types
//!
//! This module defines the error taxonomy used across the load generator.
//!
//! ## Taxonomy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SurgeError Variant → Meaning                       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  Validation(Vec<FieldError>)  │  config rejected before the run starts  │
//! │  Limiter(LimiterError)        │  QueueOverflow / WaitTimeout            │
//! │  Transport(String)            │  DNS/TCP/TLS/timeout during a request   │
//! │  Fatal(String)                │  HTTP client couldn't be constructed    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two members of the taxonomy described in the design notes are deliberately
//! *not* `SurgeError` variants:
//!
//! - An HTTP status code outside 2xx is not an error, it's data — it lands on
//!   [`crate::model::RequestResult`] as a plain field.
//! - Early exit is an internal control signal between [`crate::result_sink`]
//!   and [`crate::controller`], not a failure.

use std::fmt;

/// A single field that failed validation, with a dotted path to the culprit.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    /// Dotted path to the offending field, e.g. `requests[2].url`.
    pub path: String,
    /// Human-readable explanation.
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Errors raised by the rate limiter / throttling queue.
///
/// Neither variant terminates a run: the worker converts both into a failed
/// [`crate::config::RequestResult`] with `status = 0`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LimiterError {
    /// The throttling queue was already at `maxQueueSize` for this endpoint.
    #[error("rate limit queue overflow for endpoint (max queue size reached)")]
    QueueOverflow,

    /// The waiter's age exceeded `maxWaitTime` before a token became available.
    #[error("rate limit wait exceeded the configured maximum wait time")]
    WaitTimeout,

    /// The waiter was removed because the queue was cleared (shutdown/reset).
    #[error("rate limit queue was cleared")]
    Cleared,
}

/// Top-level error type for the load generator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SurgeError {
    /// Configuration failed validation before the Controller could start.
    #[error("invalid configuration: {0:?}")]
    Validation(Vec<FieldError>),

    /// A rate-limiter admission error. Surfaced as a variant so the worker
    /// can convert it into a descriptive [`crate::config::RequestResult`]
    /// rather than propagating it to the caller.
    #[error("rate limiter error: {0}")]
    Limiter(#[from] LimiterError),

    /// Transport-level failure: DNS, TCP, TLS, timeout, connection reset.
    #[error("transport error: {0}")]
    Transport(String),

    /// The run could not even start: the HTTP client failed to construct,
    /// or a required resource could not be bound.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl SurgeError {
    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self::Validation(errors)
    }

    pub fn single_validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(path, message)])
    }
}

impl From<reqwest::Error> for SurgeError {
    fn from(err: reqwest::Error) -> Self {
        SurgeError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SurgeError>;
