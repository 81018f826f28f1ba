//! Implementation planning via the classification-selected template.

use super::{
    emit_validation_failure, execute_agent_template, StepResult, WorkflowContext, WorkflowStep,
};
use crate::notify::CommentPayload;
use adw_core::json_parser::{parse_and_validate_json, FieldType, RequiredFields};
use adw_core::{schemas, ArtifactPayload, PlanData};
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

pub const PLAN_STEP_NAME: &str = "Building implementation plan";

const AGENT_PLANNER: &str = "planner";

pub(crate) fn plan_required_fields() -> RequiredFields {
    [
        ("output", FieldType::String),
        ("plan", FieldType::String),
        ("summary", FieldType::String),
    ]
    .into_iter()
    .collect()
}

pub(crate) fn plan_from_value(value: &Value) -> PlanData {
    PlanData {
        output: value["output"].as_str().unwrap_or_default().to_string(),
        plan: value["plan"].as_str().unwrap_or_default().to_string(),
        summary: value["summary"].as_str().unwrap_or_default().to_string(),
    }
}

/// Build the implementation plan for a classified issue.
///
/// The slash command comes from the classification (`/adw-<type>-plan`), the
/// model tier from its complexity level.
#[derive(Debug, Default)]
pub struct PlanStep;

#[async_trait]
impl WorkflowStep for PlanStep {
    fn name(&self) -> &str {
        PLAN_STEP_NAME
    }

    async fn run(&self, context: &mut WorkflowContext) -> StepResult {
        let Some(issue) = context.issue() else {
            return StepResult::fail("issue not available");
        };
        let Some(classify) = context.classify_data() else {
            return StepResult::fail("classification not available");
        };

        let command = classify.plan_command();
        let response = execute_agent_template(
            context,
            AGENT_PLANNER,
            &command,
            &[&issue.description],
            Some(classify.plan_model()),
            Some(schemas::PLAN_SCHEMA),
            "claude",
        )
        .await;

        if !response.success {
            return StepResult::fail(format!(
                "planning agent failed: {}",
                response.error_detail.unwrap_or(response.output)
            ));
        }

        let parse_result =
            parse_and_validate_json(&response.output, &plan_required_fields(), Some("plan"));
        let Some(value) = parse_result.data else {
            let detail = parse_result.error.unwrap_or_else(|| "invalid output".to_string());
            emit_validation_failure(
                &context.notifier,
                context.issue_id,
                &context.adw_id,
                "Planning",
                &response.output,
                &detail,
            )
            .await;
            return StepResult::fail(detail);
        };

        let plan = plan_from_value(&value);
        info!(summary = %plan.summary, "implementation plan created");

        context.data.plan = Some(plan.clone());
        if let Err(e) = context
            .save_artifact(ArtifactPayload::Plan { plan: plan.clone() })
            .await
        {
            return StepResult::fail(format!("failed to save plan artifact: {e}"));
        }

        context
            .notifier
            .emit_and_log(
                &CommentPayload::workflow(
                    context.issue_id,
                    &context.adw_id,
                    "Implementation plan created successfully",
                    serde_json::json!({ "summary": plan.summary }),
                )
                .with_kind("plan"),
            )
            .await;

        StepResult::ok_with_parsed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_parses_from_valid_value() {
        let value = serde_json::json!({
            "output": "plan", "plan": "# Plan\n...", "summary": "Adds toggle"
        });
        let plan = plan_from_value(&value);
        assert_eq!(plan.summary, "Adds toggle");
        assert!(plan.plan.starts_with("# Plan"));
    }

    #[test]
    fn plan_fields_are_required() {
        let result = parse_and_validate_json(
            r#"{"output": "plan", "summary": "missing plan field"}"#,
            &plan_required_fields(),
            Some("plan"),
        );
        assert!(!result.success);
        assert!(result.error.unwrap().contains("'plan'"));
    }
}
