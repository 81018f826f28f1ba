//! GitLab merge-request creation via the `glab` CLI.

use super::gh_pull_request::{parse_existing_pr_url, push_current_branch, PLATFORM_CLI_TIMEOUT};
use super::{StepResult, WorkflowContext, WorkflowStep};
use crate::exec::{run_tool, ToolError};
use crate::notify::CommentPayload;
use adw_core::{config, ArtifactPayload};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{info, warn};

pub const GLAB_PULL_REQUEST_STEP_NAME: &str = "Creating GitLab merge request";

/// Create a GitLab merge request from the composed metadata.
///
/// Mirrors the GitHub step's skip-versus-fail taxonomy, with `GITLAB_PAT`
/// forwarded to `glab` as `GITLAB_TOKEN`.
#[derive(Debug, Default)]
pub struct GlabPullRequestStep;

impl GlabPullRequestStep {
    async fn emit_skip(&self, context: &WorkflowContext, reason: &str) {
        info!("{reason}");
        context
            .notifier
            .emit_and_log(&CommentPayload::workflow(
                context.issue_id,
                &context.adw_id,
                reason,
                serde_json::json!({ "output": "merge-request-skipped", "reason": reason }),
            ))
            .await;
    }

    async fn emit_failure(&self, context: &WorkflowContext, error: &str) {
        context
            .notifier
            .emit_and_log(&CommentPayload::workflow(
                context.issue_id,
                &context.adw_id,
                error,
                serde_json::json!({ "output": "merge-request-failed", "error": error }),
            ))
            .await;
    }
}

#[async_trait]
impl WorkflowStep for GlabPullRequestStep {
    fn name(&self) -> &str {
        GLAB_PULL_REQUEST_STEP_NAME
    }

    fn is_critical(&self) -> bool {
        false
    }

    async fn run(&self, context: &mut WorkflowContext) -> StepResult {
        let Some(details) = context.pr_details() else {
            self.emit_skip(context, "MR creation skipped: no PR details in context")
                .await;
            return StepResult::ok();
        };
        if details.title.is_empty() {
            self.emit_skip(context, "MR creation skipped: MR title is empty")
                .await;
            return StepResult::ok();
        }
        let Some(pat) = config::gitlab_pat() else {
            self.emit_skip(
                context,
                "MR creation skipped: GITLAB_PAT environment variable not set",
            )
            .await;
            return StepResult::ok();
        };

        let env: HashMap<String, String> =
            [("GITLAB_TOKEN".to_string(), pat)].into_iter().collect();
        push_current_branch(&env).await;

        let repo = config::app_root();
        let output = match run_tool(
            "glab",
            &[
                "mr",
                "create",
                "--title",
                &details.title,
                "--description",
                &details.summary,
            ],
            &repo,
            &env,
            Some(PLATFORM_CLI_TIMEOUT),
        )
        .await
        {
            Ok(output) => output,
            Err(ToolError::NotFound(_)) => {
                self.emit_skip(context, "MR creation skipped: glab CLI not found on PATH")
                    .await;
                return StepResult::ok();
            }
            Err(e) => {
                let error = format!("glab mr create failed: {e}");
                self.emit_failure(context, &error).await;
                return StepResult::fail(error);
            }
        };

        let (url, existing) = if output.success() {
            (output.stdout.trim().to_string(), false)
        } else if let Some(url) = parse_existing_pr_url(&output.stderr) {
            info!(url = %url, "merge request already exists, treating as success");
            (url, true)
        } else {
            let error = format!(
                "glab mr create failed (exit code {}): {}",
                output.exit_code,
                output.stderr.trim()
            );
            warn!("{error}");
            self.emit_failure(context, &error).await;
            return StepResult::fail(error);
        };

        info!(url = %url, existing, "merge request created");

        if let Err(e) = context
            .save_artifact(ArtifactPayload::GlabPullRequest {
                url: url.clone(),
                existing,
            })
            .await
        {
            return StepResult::fail(format!("failed to save glab-pull-request artifact: {e}"));
        }

        context
            .notifier
            .emit_and_log(&CommentPayload::workflow(
                context.issue_id,
                &context.adw_id,
                format!("Merge request created: {url}"),
                serde_json::json!({
                    "output": "merge-request-created",
                    "url": url,
                    "existing": existing,
                    "commits": serde_json::to_value(&details.commits).unwrap_or_default(),
                }),
            ))
            .await;

        StepResult::ok()
    }
}
