//! # Run Configuration
//!
//! The wire format a caller hands in: JSON recognized keys, defaults, and
//! loading helpers. `RunConfig` deserializes with `deny_unknown_fields` so
//! a typo'd key surfaces as a load-time error rather than a silently
//! ignored field; the remaining structural rules (ranges, the
//! earlyExitOnError-requires-a-threshold rule) are enforced separately by
//! [`crate::config_validator`], which no derive macro expresses cleanly.

use crate::error::SurgeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;
use validator::Validate;

fn default_workers() -> usize {
    10
}

fn default_duration() -> u64 {
    10
}

/// HTTP method for a request template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Default for Method {
    fn default() -> Self {
        Method::Get
    }
}

impl Method {
    pub fn as_reqwest_method(&self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
            Method::Options => reqwest::Method::OPTIONS,
        }
    }
}

/// A single entry in the `requests` array.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RequestTemplateConfig {
    #[validate(url)]
    pub url: String,
    #[serde(default)]
    pub method: Method,
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub target_rps: Option<f64>,
}

/// The full recognized configuration surface for a run.
///
/// `run_id` is never read from input — it is stamped fresh on every
/// successful deserialization, purely for log correlation and the final
/// summary.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RunConfig {
    #[validate(nested)]
    pub requests: Vec<RequestTemplateConfig>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[validate(range(min = 1))]
    #[serde(default = "default_workers")]
    pub workers: usize,
    pub concurrent_requests: Option<usize>,
    #[serde(default = "default_duration")]
    pub duration: u64,
    #[serde(default)]
    pub ramp_up_time: u64,
    pub rps: Option<u32>,
    #[serde(default)]
    pub autoscale: bool,
    #[serde(default)]
    pub early_exit_on_error: bool,
    pub error_rate_threshold: Option<f64>,
    pub error_count_threshold: Option<u64>,
    pub error_status_codes: Option<Vec<u16>>,
    pub export: Option<String>,
    #[serde(skip, default = "Uuid::new_v4")]
    pub run_id: Uuid,
}

impl RunConfig {
    /// Parses and structurally validates a run configuration from a JSON
    /// value. Does not run the cross-field rules in
    /// [`crate::config_validator`] — callers that need the full
    /// structured `ValidationError` should use
    /// [`crate::config_validator::validate`] on the result.
    pub fn from_json(value: serde_json::Value) -> Result<Self, SurgeError> {
        serde_json::from_value(value)
            .map_err(|e| SurgeError::single_validation("<root>", e.to_string()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self, SurgeError> {
        serde_json::from_str(raw).map_err(|e| SurgeError::single_validation("<root>", e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SurgeError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SurgeError::Fatal(format!("failed to read config file: {e}")))?;
        Self::from_json_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_applies_defaults() {
        let cfg = RunConfig::from_json_str(
            r#"{ "requests": [ { "url": "http://h/x" } ] }"#,
        )
        .unwrap();
        assert_eq!(cfg.workers, 10);
        assert_eq!(cfg.duration, 10);
        assert_eq!(cfg.requests[0].method, Method::Get);
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let result = RunConfig::from_json_str(
            r#"{ "requests": [ { "url": "http://h/x" } ], "bogus": true }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn unknown_request_key_is_rejected() {
        let result = RunConfig::from_json_str(
            r#"{ "requests": [ { "url": "http://h/x", "bogus": 1 } ] }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn run_id_differs_across_loads() {
        let raw = r#"{ "requests": [ { "url": "http://h/x" } ] }"#;
        let a = RunConfig::from_json_str(raw).unwrap();
        let b = RunConfig::from_json_str(raw).unwrap();
        assert_ne!(a.run_id, b.run_id);
    }
}
