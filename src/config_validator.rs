//! # Configuration Validator
//!
//! Runs the `validator`-derived field/range checks on [`RunConfig`] first
//! — walking the full `ValidationErrors` tree, not just its top-level
//! `field_errors()`, so a `#[validate(nested)]` failure inside
//! `requests[i]` surfaces as `requests[i].url` instead of being silently
//! dropped — then layers the cross-field and range rules a derive macro
//! can't express on its own: absolute http(s) URLs, numeric ranges, and
//! the "at least one threshold when `earlyExitOnError` is set" rule.
//! Collects every offending field into one [`FieldError`] list rather than
//! failing fast on the first problem, so a caller sees the whole picture
//! in one validation pass.

use crate::config::RunConfig;
use crate::error::{FieldError, SurgeError};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// Validates a loaded [`RunConfig`] beyond what serde's shape check
/// already enforces. Returns every offending field at once.
pub fn validate(config: &RunConfig) -> Result<(), SurgeError> {
    let mut errors = Vec::new();

    if let Err(shape_errors) = config.validate() {
        flatten_validation_errors(&shape_errors, "", &mut errors);
    }

    if config.requests.is_empty() {
        errors.push(FieldError::new("requests", "must contain at least one request template"));
    }

    for (i, request) in config.requests.iter().enumerate() {
        validate_absolute_http_url(&format!("requests[{i}].url"), &request.url, &mut errors);
        if let Some(rps) = request.target_rps {
            if rps <= 0.0 {
                errors.push(FieldError::new(
                    format!("requests[{i}].targetRps"),
                    "must be greater than zero",
                ));
            }
        }
    }

    if config.workers == 0 {
        errors.push(FieldError::new("workers", "must be a positive integer"));
    }

    if let Some(concurrent) = config.concurrent_requests {
        if concurrent == 0 {
            errors.push(FieldError::new(
                "concurrentRequests",
                "must be a positive integer",
            ));
        }
    }

    if config.duration == 0 {
        errors.push(FieldError::new("duration", "must be a positive number of seconds"));
    }

    if let Some(rps) = config.rps {
        if rps == 0 {
            errors.push(FieldError::new("rps", "must be a positive integer"));
        }
    }

    if let Some(threshold) = config.error_rate_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            errors.push(FieldError::new(
                "errorRateThreshold",
                "must be in the range [0, 1]",
            ));
        }
    }

    if let Some(codes) = &config.error_status_codes {
        for (i, code) in codes.iter().enumerate() {
            if !(100..=599).contains(code) {
                errors.push(FieldError::new(
                    format!("errorStatusCodes[{i}]"),
                    "must be an HTTP status code in [100, 599]",
                ));
            }
        }
    }

    if config.early_exit_on_error
        && config.error_rate_threshold.is_none()
        && config.error_count_threshold.is_none()
        && config.error_status_codes.as_ref().map_or(true, |c| c.is_empty())
    {
        errors.push(FieldError::new(
            "earlyExitOnError",
            "requires at least one of errorRateThreshold, errorCountThreshold, or errorStatusCodes",
        ));
    }

    if let Some(export) = &config.export {
        if export.is_empty() {
            errors.push(FieldError::new("export", "must not be an empty string"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SurgeError::validation(errors))
    }
}

/// Walks a `ValidationErrors` tree, including the `List`/`Struct` variants
/// `field_errors()` doesn't surface, and flattens it into dotted/indexed
/// [`FieldError`] paths (e.g. `requests[2].url`).
fn flatten_validation_errors(errors: &ValidationErrors, prefix: &str, out: &mut Vec<FieldError>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                for fe in field_errors {
                    out.push(FieldError::new(
                        path.clone(),
                        fe.message.as_deref().unwrap_or("failed validation").to_string(),
                    ));
                }
            }
            ValidationErrorsKind::Struct(nested) => {
                flatten_validation_errors(nested, &path, out);
            }
            ValidationErrorsKind::List(nested_by_index) => {
                for (i, nested) in nested_by_index {
                    flatten_validation_errors(nested, &format!("{path}[{i}]"), out);
                }
            }
        }
    }
}

fn validate_absolute_http_url(path: &str, url: &str, errors: &mut Vec<FieldError>) {
    match reqwest::Url::parse(url) {
        Ok(parsed) => {
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                errors.push(FieldError::new(path, "must use the http or https scheme"));
            }
        }
        Err(_) => errors.push(FieldError::new(path, "must be an absolute http(s) URL")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;

    fn base_config(extra: &str) -> RunConfig {
        let raw = format!(
            r#"{{ "requests": [ {{ "url": "http://h/x" }} ] {} }}"#,
            if extra.is_empty() { String::new() } else { format!(", {extra}") }
        );
        RunConfig::from_json_str(&raw).unwrap()
    }

    #[test]
    fn minimal_config_is_valid() {
        assert!(validate(&base_config("")).is_ok());
    }

    #[test]
    fn relative_url_is_rejected() {
        let raw = r#"{ "requests": [ { "url": "/relative" } ] }"#;
        let cfg = RunConfig::from_json_str(raw).unwrap();
        let result = validate(&cfg);
        assert!(result.is_err());
    }

    #[test]
    fn nested_request_url_error_surfaces_with_an_indexed_path() {
        // `#[validate(url)]` on `RequestTemplateConfig::url` should reach
        // the final error list through the `#[validate(nested)]` walk on
        // `RunConfig::requests`, not just through the hand-written re-check.
        let raw = r#"{ "requests": [ { "url": "http://h/ok" }, { "url": "not-a-url" } ] }"#;
        let cfg = RunConfig::from_json_str(raw).unwrap();
        match validate(&cfg) {
            Err(SurgeError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.path == "requests[1].url"));
            }
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn early_exit_without_threshold_is_rejected() {
        let cfg = base_config(r#""earlyExitOnError": true"#);
        let result = validate(&cfg);
        match result {
            Err(SurgeError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.path == "earlyExitOnError"));
            }
            _ => panic!("expected a validation error"),
        }
    }

    #[test]
    fn early_exit_with_threshold_is_accepted() {
        let cfg = base_config(r#""earlyExitOnError": true, "errorCountThreshold": 5"#);
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn out_of_range_error_rate_threshold_is_rejected() {
        let cfg = base_config(r#""errorRateThreshold": 1.5"#);
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn out_of_range_status_code_is_rejected() {
        let cfg = base_config(r#""errorStatusCodes": [700]"#);
        assert!(validate(&cfg).is_err());
    }
}
