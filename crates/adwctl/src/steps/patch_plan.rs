//! Patch planning: a standalone plan built from the parent workflow's
//! context plus the patch request.

use super::plan::{plan_from_value, plan_required_fields};
use super::{
    emit_validation_failure, execute_agent_template, StepResult, WorkflowContext, WorkflowStep,
};
use crate::notify::CommentPayload;
use adw_core::json_parser::parse_and_validate_json;
use adw_core::{schemas, ArtifactKind, ArtifactPayload, PlanData};
use async_trait::async_trait;
use tracing::info;

pub const PATCH_PLAN_STEP_NAME: &str = "Building patch plan";

const AGENT_PLANNER: &str = "planner";

/// Compose the patch-planning prompt argument from the original issue, the
/// original plan, and the patch request.
pub fn compose_patch_context(
    original_issue: Option<&str>,
    original_plan: Option<&PlanData>,
    patch_description: &str,
) -> String {
    let mut sections = Vec::new();
    if let Some(description) = original_issue {
        sections.push(format!("## Original issue\n\n{description}"));
    }
    if let Some(plan) = original_plan {
        sections.push(format!("## Original plan\n\n{}", plan.plan));
    }
    sections.push(format!("## Patch request\n\n{patch_description}"));
    sections.join("\n\n")
}

/// Build a standalone implementation plan for a patch issue.
///
/// The original issue and plan resolve through the artifact store's
/// parent-workflow fallback, so the patch run plans with full context even
/// though it never produced those artifacts itself.
#[derive(Debug, Default)]
pub struct PatchPlanStep;

#[async_trait]
impl WorkflowStep for PatchPlanStep {
    fn name(&self) -> &str {
        PATCH_PLAN_STEP_NAME
    }

    async fn run(&self, context: &mut WorkflowContext) -> StepResult {
        let Some(patch_issue) = context.patch_issue() else {
            return StepResult::fail("patch issue not available");
        };

        // Parent context, best-effort: a patch can still be planned from its
        // own description when the parent artifacts are gone.
        let original_issue = context.issue().map(|issue| issue.description);
        let original_plan = match context.store.read(ArtifactKind::Plan) {
            Ok(artifact) => match artifact.payload {
                ArtifactPayload::Plan { plan } => Some(plan),
                _ => None,
            },
            Err(_) => None,
        };

        let composite = compose_patch_context(
            original_issue.as_deref(),
            original_plan.as_ref(),
            &patch_issue.description,
        );

        let response = execute_agent_template(
            context,
            AGENT_PLANNER,
            "/adw-patch-plan",
            &[&composite],
            Some("sonnet"),
            Some(schemas::PLAN_SCHEMA),
            "claude",
        )
        .await;

        if !response.success {
            return StepResult::fail(format!(
                "patch planning agent failed: {}",
                response.error_detail.unwrap_or(response.output)
            ));
        }

        let parse_result =
            parse_and_validate_json(&response.output, &plan_required_fields(), Some("patch-plan"));
        let Some(value) = parse_result.data else {
            let detail = parse_result.error.unwrap_or_else(|| "invalid output".to_string());
            emit_validation_failure(
                &context.notifier,
                context.issue_id,
                &context.adw_id,
                "Patch planning",
                &response.output,
                &detail,
            )
            .await;
            return StepResult::fail(detail);
        };

        let plan = plan_from_value(&value);
        info!(summary = %plan.summary, "patch plan created");

        context.data.plan = Some(plan.clone());
        if let Err(e) = context
            .save_artifact(ArtifactPayload::PatchPlan { plan: plan.clone() })
            .await
        {
            return StepResult::fail(format!("failed to save patch-plan artifact: {e}"));
        }

        context
            .notifier
            .emit_and_log(
                &CommentPayload::workflow(
                    context.issue_id,
                    &context.adw_id,
                    "Patch plan created successfully",
                    serde_json::json!({ "summary": plan.summary }),
                )
                .with_kind("plan"),
            )
            .await;

        StepResult::ok_with_parsed(value)
    }
}
