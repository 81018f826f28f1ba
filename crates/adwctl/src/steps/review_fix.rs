//! Address review findings and request re-review.

use super::code_review::CODE_REVIEW_STEP_NAME;
use super::{
    emit_validation_failure, execute_agent_template, StepResult, WorkflowContext, WorkflowStep,
};
use crate::notify::CommentPayload;
use adw_core::json_parser::{parse_and_validate_json, FieldType, RequiredFields};
use adw_core::{schemas, ArtifactPayload};
use async_trait::async_trait;
use tracing::info;

pub const REVIEW_FIX_STEP_NAME: &str = "Addressing review issues";

const AGENT_CODE_REVIEW: &str = "code_review";

fn required_fields() -> RequiredFields {
    [
        ("issues", FieldType::Array),
        ("output", FieldType::String),
        ("summary", FieldType::String),
    ]
    .into_iter()
    .collect()
}

/// Fix the issues a dirty review raised, then re-enter the pipeline at the
/// review step so the fixes get re-evaluated.
///
/// The runner's per-step iteration budget bounds the loop; once it is
/// exhausted the rerun is demoted and the workflow continues forward. A
/// clean review short-circuits the step entirely.
#[derive(Debug, Default)]
pub struct ReviewFixStep;

#[async_trait]
impl WorkflowStep for ReviewFixStep {
    fn name(&self) -> &str {
        REVIEW_FIX_STEP_NAME
    }

    fn is_critical(&self) -> bool {
        false
    }

    async fn run(&self, context: &mut WorkflowContext) -> StepResult {
        if context.data.review_is_clean {
            info!("review is clean, no issues to address");
            return StepResult::ok();
        }

        let Some(review_text) = context.review_text() else {
            info!("no review data available, skipping review fix");
            return StepResult::ok();
        };
        let review_text = review_text.trim().to_string();
        if review_text.is_empty() {
            info!("review text is empty, skipping review fix");
            return StepResult::ok();
        }

        let response = execute_agent_template(
            context,
            AGENT_CODE_REVIEW,
            "/adw-implement-review",
            &[&review_text],
            Some("sonnet"),
            Some(schemas::REVIEW_FIX_SCHEMA),
            "claude",
        )
        .await;

        if !response.success {
            let detail = response.error_detail.unwrap_or(response.output);
            let _ = context
                .save_artifact(ArtifactPayload::ReviewFix {
                    success: false,
                    message: Some(detail.clone()),
                })
                .await;
            return StepResult::fail(format!("failed to address review issues: {detail}"));
        }

        let parse_result =
            parse_and_validate_json(&response.output, &required_fields(), Some("review-fix"));
        let Some(value) = parse_result.data else {
            let detail = parse_result.error.unwrap_or_else(|| "invalid output".to_string());
            emit_validation_failure(
                &context.notifier,
                context.issue_id,
                &context.adw_id,
                "Review fix",
                &response.output,
                &detail,
            )
            .await;
            return StepResult::fail(detail);
        };

        let summary = value["summary"].as_str().unwrap_or_default().to_string();
        info!(summary = %summary, "review issues addressed");

        if let Err(e) = context
            .save_artifact(ArtifactPayload::ReviewFix {
                success: true,
                message: Some("Review issues addressed, re-running review".to_string()),
            })
            .await
        {
            return StepResult::fail(format!("failed to save review-fix artifact: {e}"));
        }

        context
            .notifier
            .emit_and_log(
                &CommentPayload::workflow(
                    context.issue_id,
                    &context.adw_id,
                    "Review issues addressed, re-running review.",
                    serde_json::json!({
                        "summary": summary,
                        "issues": value["issues"],
                    }),
                )
                .with_kind("review"),
            )
            .await;

        // Request re-review; the runner enforces the iteration budget and
        // demotes this to a plain success when it runs out.
        StepResult::ok_with_parsed(value).with_rerun_from(CODE_REVIEW_STEP_NAME)
    }
}
