//! Pull-request metadata composition.

use super::{
    emit_validation_failure, execute_agent_template, PrDetails, StepResult, WorkflowContext,
    WorkflowStep,
};
use crate::notify::CommentPayload;
use adw_core::json_parser::{parse_and_validate_json, FieldType, RequiredFields};
use adw_core::{schemas, ArtifactPayload, CommitPlan};
use async_trait::async_trait;
use tracing::info;

pub const COMPOSE_REQUEST_STEP_NAME: &str = "Preparing pull request";

const AGENT_PR_COMPOSER: &str = "pr_composer";

fn required_fields() -> RequiredFields {
    [
        ("output", FieldType::String),
        ("title", FieldType::String),
        ("summary", FieldType::String),
        ("commits", FieldType::Array),
    ]
    .into_iter()
    .collect()
}

/// Compose the PR title, summary and commit list from the work done so far.
#[derive(Debug, Default)]
pub struct ComposeRequestStep;

#[async_trait]
impl WorkflowStep for ComposeRequestStep {
    fn name(&self) -> &str {
        COMPOSE_REQUEST_STEP_NAME
    }

    async fn run(&self, context: &mut WorkflowContext) -> StepResult {
        let response = execute_agent_template(
            context,
            AGENT_PR_COMPOSER,
            "/adw-pull-request",
            &[],
            Some("sonnet"),
            Some(schemas::COMPOSE_REQUEST_SCHEMA),
            "claude",
        )
        .await;

        if !response.success {
            return StepResult::fail(format!(
                "pull request composition failed: {}",
                response.error_detail.unwrap_or(response.output)
            ));
        }

        let parse_result =
            parse_and_validate_json(&response.output, &required_fields(), Some("compose-request"));
        let Some(value) = parse_result.data else {
            let detail = parse_result.error.unwrap_or_else(|| "invalid output".to_string());
            emit_validation_failure(
                &context.notifier,
                context.issue_id,
                &context.adw_id,
                "Pull request composition",
                &response.output,
                &detail,
            )
            .await;
            return StepResult::fail(detail);
        };

        let title = value["title"].as_str().unwrap_or_default().to_string();
        let summary = value["summary"].as_str().unwrap_or_default().to_string();
        let commits: Vec<CommitPlan> =
            serde_json::from_value(value["commits"].clone()).unwrap_or_default();
        info!(title = %title, commits = commits.len(), "pull request metadata composed");

        context.data.pr_details = Some(PrDetails {
            title: title.clone(),
            summary: summary.clone(),
            commits: commits.clone(),
        });

        if let Err(e) = context
            .save_artifact(ArtifactPayload::ComposeRequest {
                title,
                summary,
                commits,
            })
            .await
        {
            return StepResult::fail(format!("failed to save compose-request artifact: {e}"));
        }

        context
            .notifier
            .emit_and_log(&CommentPayload::workflow(
                context.issue_id,
                &context.adw_id,
                "Pull request prepared.",
                serde_json::json!({ "text": "Pull request prepared." }),
            ))
            .await;

        StepResult::ok_with_parsed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_request_fixture_validates() {
        let result = parse_and_validate_json(
            r#"{"output": "pull-request", "title": "Add dark mode",
                "summary": "Adds a dark mode toggle", "commits": [{"message": "feat: toggle"}]}"#,
            &required_fields(),
            Some("compose-request"),
        );
        assert!(result.success);
        let commits: Vec<CommitPlan> =
            serde_json::from_value(result.data.unwrap()["commits"].clone()).unwrap();
        assert_eq!(commits[0].message, "feat: toggle");
    }
}
