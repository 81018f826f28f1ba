//! Fetch the issue under work from the shared store.

use super::{StepResult, WorkflowContext, WorkflowStep};
use crate::notify::CommentPayload;
use adw_core::ArtifactPayload;
use async_trait::async_trait;
use tracing::{info, warn};

pub const FETCH_ISSUE_STEP_NAME: &str = "Fetching issue";

/// Dependency-free entry step of the main pipeline.
///
/// Loads the issue record, stamps the workflow id onto the row, persists the
/// `fetch-issue` artifact and announces the workflow start on the issue log.
#[derive(Debug, Default)]
pub struct FetchIssueStep;

#[async_trait]
impl WorkflowStep for FetchIssueStep {
    fn name(&self) -> &str {
        FETCH_ISSUE_STEP_NAME
    }

    async fn run(&self, context: &mut WorkflowContext) -> StepResult {
        let Some(issue_id) = context.issue_id else {
            return StepResult::fail("issue id not available");
        };
        let Some(store) = context.issue_store.clone() else {
            return StepResult::fail("issue store unavailable");
        };

        let issue = match store.fetch_issue(issue_id).await {
            Ok(issue) => issue,
            Err(e) => return StepResult::fail(format!("error fetching issue {issue_id}: {e}")),
        };
        info!(issue_id = issue.id, status = issue.status.as_str(), "issue fetched");

        // Stamp the workflow id onto the row so patch runs can find their
        // parent later; last-writer-wins and never fatal.
        if let Err(e) = store
            .update_issue_adw_id(issue_id, context.adw_id.as_ref())
            .await
        {
            warn!(error = %e, issue_id, "failed to record adw_id on issue");
        }

        context.data.issue = Some(issue.clone());
        if let Err(e) = context
            .save_artifact(ArtifactPayload::FetchIssue { issue })
            .await
        {
            return StepResult::fail(format!("failed to save fetch-issue artifact: {e}"));
        }

        context
            .notifier
            .emit_and_log(&CommentPayload::workflow(
                context.issue_id,
                &context.adw_id,
                "Workflow started. Issue fetched and validated",
                serde_json::json!({
                    "issue_id": issue_id,
                    "text": "Workflow started. Issue fetched and validated.",
                }),
            ))
            .await;

        StepResult::ok()
    }
}
