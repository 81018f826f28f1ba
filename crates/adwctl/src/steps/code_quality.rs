//! Lint and type-check pass via an agent slash command.

use super::{
    emit_validation_failure, execute_agent_template, StepResult, WorkflowContext, WorkflowStep,
};
use crate::notify::CommentPayload;
use adw_core::json_parser::{parse_and_validate_json, FieldType, RequiredFields};
use adw_core::{schemas, ArtifactPayload, QualityTool};
use async_trait::async_trait;
use tracing::info;

pub const CODE_QUALITY_STEP_NAME: &str = "Running code quality checks";

const AGENT_QUALITY: &str = "quality";

fn required_fields() -> RequiredFields {
    [("output", FieldType::String), ("tools", FieldType::Array)]
        .into_iter()
        .collect()
}

/// Run the repository's linters and type-checkers through the agent.
/// Best-effort by design.
#[derive(Debug, Default)]
pub struct CodeQualityStep;

#[async_trait]
impl WorkflowStep for CodeQualityStep {
    fn name(&self) -> &str {
        CODE_QUALITY_STEP_NAME
    }

    fn is_critical(&self) -> bool {
        false
    }

    async fn run(&self, context: &mut WorkflowContext) -> StepResult {
        let response = execute_agent_template(
            context,
            AGENT_QUALITY,
            "/adw-code-quality",
            &[],
            Some("sonnet"),
            Some(schemas::CODE_QUALITY_SCHEMA),
            "claude",
        )
        .await;

        if !response.success {
            return StepResult::fail(format!(
                "code quality checks failed: {}",
                response.error_detail.unwrap_or(response.output)
            ));
        }

        let parse_result =
            parse_and_validate_json(&response.output, &required_fields(), Some("code-quality"));
        let Some(value) = parse_result.data else {
            let detail = parse_result.error.unwrap_or_else(|| "invalid output".to_string());
            emit_validation_failure(
                &context.notifier,
                context.issue_id,
                &context.adw_id,
                "Code quality",
                &response.output,
                &detail,
            )
            .await;
            return StepResult::fail(detail);
        };

        let tools: Vec<QualityTool> =
            serde_json::from_value(value["tools"].clone()).unwrap_or_default();
        let output = value["output"].as_str().unwrap_or_default().to_string();
        info!(tools = tools.len(), "code quality checks completed");

        if let Err(e) = context
            .save_artifact(ArtifactPayload::CodeQuality { output, tools })
            .await
        {
            return StepResult::fail(format!("failed to save code-quality artifact: {e}"));
        }

        context
            .notifier
            .emit_and_log(&CommentPayload::workflow(
                context.issue_id,
                &context.adw_id,
                "Code quality checks completed.",
                serde_json::json!({ "text": "Code quality checks completed." }),
            ))
            .await;

        StepResult::ok_with_parsed(value)
    }
}
