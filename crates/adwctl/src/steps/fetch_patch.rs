//! Fetch a patch issue from the shared store.

use super::{StepResult, WorkflowContext, WorkflowStep};
use crate::notify::CommentPayload;
use adw_core::{ArtifactPayload, IssueType};
use async_trait::async_trait;
use tracing::info;

pub const FETCH_PATCH_STEP_NAME: &str = "Fetching patch issue";

/// Dependency-free entry step of the patch pipeline.
///
/// The claimed issue must be of patch type; the parent workflow is implied
/// by this run's `-patch` id suffix rather than fetched here.
#[derive(Debug, Default)]
pub struct FetchPatchStep;

#[async_trait]
impl WorkflowStep for FetchPatchStep {
    fn name(&self) -> &str {
        FETCH_PATCH_STEP_NAME
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
            Err(e) => {
                return StepResult::fail(format!("error fetching patch issue {issue_id}: {e}"));
            }
        };
        if issue.issue_type != IssueType::Patch {
            return StepResult::fail(format!(
                "issue {issue_id} is not a patch issue (type: {})",
                issue.issue_type.as_str()
            ));
        }
        info!(issue_id = issue.id, "patch issue fetched");

        context.data.patch_issue = Some(issue.clone());
        if let Err(e) = context
            .save_artifact(ArtifactPayload::FetchPatch { issue })
            .await
        {
            return StepResult::fail(format!("failed to save fetch-patch artifact: {e}"));
        }

        context
            .notifier
            .emit_and_log(&CommentPayload::workflow(
                context.issue_id,
                &context.adw_id,
                "Patch workflow started. Patch issue fetched",
                serde_json::json!({
                    "issue_id": issue_id,
                    "parent_workflow": context.store.parent_workflow_id().map(ToString::to_string),
                }),
            ))
            .await;

        StepResult::ok()
    }
}
