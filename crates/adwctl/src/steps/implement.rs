//! Plan execution through the configured implement provider.

use super::{
    emit_validation_failure, execute_agent_template, StepResult, WorkflowContext, WorkflowStep,
};
use crate::notify::CommentPayload;
use adw_core::json_parser::{parse_and_validate_json, FieldType, RequiredFields};
use adw_core::{config, schemas, ArtifactKind, ArtifactPayload, ImplementData};
use async_trait::async_trait;
use tracing::info;

pub const IMPLEMENT_STEP_NAME: &str = "Implementing solution";

const AGENT_IMPLEMENTOR: &str = "implementor";

fn required_fields() -> RequiredFields {
    [
        ("files_modified", FieldType::Array),
        ("git_diff_stat", FieldType::String),
        ("output", FieldType::String),
        ("status", FieldType::String),
        ("summary", FieldType::String),
    ]
    .into_iter()
    .collect()
}

/// Execute the implementation plan.
///
/// The plan source is configurable at construction so the same step serves
/// both pipelines: main runs read the `plan` artifact, patch runs the
/// `patch-plan` artifact, and a missing plan requests re-entry from the
/// matching planning step.
#[derive(Debug)]
pub struct ImplementStep {
    plan_kind: ArtifactKind,
    plan_step_name: &'static str,
}

impl ImplementStep {
    pub fn new(plan_kind: ArtifactKind, plan_step_name: &'static str) -> Self {
        Self {
            plan_kind,
            plan_step_name,
        }
    }

    pub fn for_patch() -> Self {
        Self::new(
            ArtifactKind::PatchPlan,
            super::patch_plan::PATCH_PLAN_STEP_NAME,
        )
    }
}

impl Default for ImplementStep {
    fn default() -> Self {
        Self::new(ArtifactKind::Plan, super::plan::PLAN_STEP_NAME)
    }
}

#[async_trait]
impl WorkflowStep for ImplementStep {
    fn name(&self) -> &str {
        IMPLEMENT_STEP_NAME
    }

    async fn run(&self, context: &mut WorkflowContext) -> StepResult {
        let Some(plan) = context.plan_data(self.plan_kind) else {
            return StepResult::fail("plan not available")
                .with_rerun_from(self.plan_step_name);
        };

        let provider = config::implement_provider();
        info!(provider = %provider, "using provider for implementation");

        // The envelope provider takes a slash command with the plan text as
        // its argument; the streaming provider consumes the plan directly.
        let response = if provider == "claude" {
            execute_agent_template(
                context,
                AGENT_IMPLEMENTOR,
                "/adw-implement-plan",
                &[&plan.plan],
                None,
                Some(schemas::IMPLEMENT_SCHEMA),
                &provider,
            )
            .await
        } else {
            execute_agent_template(
                context,
                AGENT_IMPLEMENTOR,
                &plan.plan,
                &[],
                None,
                None,
                &provider,
            )
            .await
        };

        if !response.success {
            return StepResult::fail(format!(
                "implementation agent failed: {}",
                response.error_detail.unwrap_or(response.output)
            ));
        }

        let parse_result =
            parse_and_validate_json(&response.output, &required_fields(), Some("implement"));
        let Some(value) = parse_result.data else {
            let detail = parse_result.error.unwrap_or_else(|| "invalid output".to_string());
            emit_validation_failure(
                &context.notifier,
                context.issue_id,
                &context.adw_id,
                "Implementation",
                &response.output,
                &detail,
            )
            .await;
            return StepResult::fail(detail);
        };

        let implement: ImplementData = match serde_json::from_value(value.clone()) {
            Ok(data) => data,
            Err(e) => {
                let detail = format!("implement output failed validation: {e}");
                emit_validation_failure(
                    &context.notifier,
                    context.issue_id,
                    &context.adw_id,
                    "Implementation",
                    &response.output,
                    &detail,
                )
                .await;
                return StepResult::fail(detail);
            }
        };

        info!(
            files = implement.files_modified.len(),
            status = ?implement.status,
            "solution implemented"
        );

        context.data.implement = Some(implement.clone());
        if let Err(e) = context
            .save_artifact(ArtifactPayload::Implement { implement })
            .await
        {
            return StepResult::fail(format!("failed to save implement artifact: {e}"));
        }

        context
            .notifier
            .emit_and_log(
                &CommentPayload::workflow(
                    context.issue_id,
                    &context.adw_id,
                    "Implementation complete.",
                    serde_json::json!({ "text": "Implementation complete." }),
                )
                .with_kind("implement"),
            )
            .await;

        StepResult::ok_with_parsed(value)
    }
}
