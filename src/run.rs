//! # Run Entry Point
//!
//! The single call a CLI, TUI, or report-formatting collaborator makes:
//! hand in a validated [`RunConfig`], get back the final summary plus the
//! raw result stream once the run terminates.

use crate::config::RunConfig;
use crate::config_validator;
use crate::controller::{Controller, RunOutcome};
use crate::error::SurgeError;
use crate::model::RequestTemplate;
use std::sync::Arc;
use tracing::info;

/// Validates `config`, drives a run to completion, and returns the final
/// summary and raw result stream. Fails before the Controller starts if
/// `config` doesn't pass structural or cross-field validation, or if the
/// HTTP collaborator can't be constructed.
pub async fn execute(config: RunConfig) -> Result<RunOutcome, SurgeError> {
    config_validator::validate(&config)?;

    let templates: Vec<Arc<RequestTemplate>> = config
        .requests
        .iter()
        .map(RequestTemplate::from_config)
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(Arc::new)
        .collect();

    info!(run_id = %config.run_id, requests = templates.len(), "starting run");

    let controller = Controller::new(&config, templates)?;
    let outcome = controller.run().await;

    info!(
        run_id = %config.run_id,
        total = outcome.summary.total_requests,
        successful = outcome.summary.successful,
        failed = outcome.summary.failed,
        "run complete"
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_invalid_config_before_starting() {
        std::env::set_var("SURGE_TEST_MODE", "1");
        let config = RunConfig::from_json_str(
            r#"{ "requests": [ { "url": "not-a-url" } ] }"#,
        )
        .unwrap();
        let result = execute(config).await;
        assert!(matches!(result, Err(SurgeError::Validation(_))));
        std::env::remove_var("SURGE_TEST_MODE");
    }
}
