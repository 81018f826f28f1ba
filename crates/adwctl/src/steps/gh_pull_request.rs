//! GitHub pull-request creation via the `gh` CLI.

use super::{StepResult, WorkflowContext, WorkflowStep};
use crate::exec::{run_tool, ToolError};
use crate::notify::CommentPayload;
use adw_core::{config, ArtifactPayload};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const GH_PULL_REQUEST_STEP_NAME: &str = "Creating GitHub pull request";

/// Push timeout; PR creation is allowed to proceed even when this expires.
pub(crate) const PUSH_TIMEOUT: Duration = Duration::from_secs(60);
/// Platform CLI timeout for `gh` / `glab` calls.
pub(crate) const PLATFORM_CLI_TIMEOUT: Duration = Duration::from_secs(120);

/// Extract the existing PR/MR URL from a "pull request ... already exists"
/// error message.
pub fn parse_existing_pr_url(stderr: &str) -> Option<String> {
    let at = stderr.find("already exists")?;
    let rest = &stderr[at..];
    let http = rest.find("http")?;
    let url = &rest[http..];
    let end = url.find(char::is_whitespace).unwrap_or(url.len());
    let url = url[..end].trim_end_matches(['.', ',']);
    (!url.is_empty()).then(|| url.to_string())
}

/// Push the current branch upstream; failure never blocks PR creation.
pub(crate) async fn push_current_branch(env: &HashMap<String, String>) {
    let repo = config::app_root();
    debug!("pushing current branch to origin");
    match run_tool(
        "git",
        &["push", "--set-upstream", "origin", "HEAD"],
        &repo,
        env,
        Some(PUSH_TIMEOUT),
    )
    .await
    {
        Ok(output) if output.success() => debug!("branch pushed successfully"),
        Ok(output) => debug!(
            exit_code = output.exit_code,
            stderr = %output.stderr.trim(),
            "git push failed, continuing to PR creation"
        ),
        Err(e) => debug!(error = %e, "git push failed, continuing to PR creation"),
    }
}

/// Create a GitHub pull request from the composed metadata.
///
/// Skips (never fails) when the metadata, credentials or the `gh` binary
/// are absent; an "already exists" answer from the remote counts as
/// success with the existing URL.
#[derive(Debug, Default)]
pub struct GhPullRequestStep;

impl GhPullRequestStep {
    async fn emit_skip(&self, context: &WorkflowContext, reason: &str) {
        info!("{reason}");
        context
            .notifier
            .emit_and_log(&CommentPayload::workflow(
                context.issue_id,
                &context.adw_id,
                reason,
                serde_json::json!({ "output": "pull-request-skipped", "reason": reason }),
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
                serde_json::json!({ "output": "pull-request-failed", "error": error }),
            ))
            .await;
    }
}

#[async_trait]
impl WorkflowStep for GhPullRequestStep {
    fn name(&self) -> &str {
        GH_PULL_REQUEST_STEP_NAME
    }

    fn is_critical(&self) -> bool {
        false
    }

    async fn run(&self, context: &mut WorkflowContext) -> StepResult {
        let Some(details) = context.pr_details() else {
            self.emit_skip(context, "PR creation skipped: no PR details in context")
                .await;
            return StepResult::ok();
        };
        if details.title.is_empty() {
            self.emit_skip(context, "PR creation skipped: PR title is empty")
                .await;
            return StepResult::ok();
        }
        let Some(pat) = config::github_pat() else {
            self.emit_skip(
                context,
                "PR creation skipped: GITHUB_PAT environment variable not set",
            )
            .await;
            return StepResult::ok();
        };

        let env: HashMap<String, String> = [("GH_TOKEN".to_string(), pat)].into_iter().collect();
        push_current_branch(&env).await;

        let repo = config::app_root();
        let output = match run_tool(
            "gh",
            &[
                "pr",
                "create",
                "--title",
                &details.title,
                "--body",
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
                self.emit_skip(context, "PR creation skipped: gh CLI not found on PATH")
                    .await;
                return StepResult::ok();
            }
            Err(e) => {
                let error = format!("gh pr create failed: {e}");
                self.emit_failure(context, &error).await;
                return StepResult::fail(error);
            }
        };

        let (url, existing) = if output.success() {
            (output.stdout.trim().to_string(), false)
        } else if let Some(url) = parse_existing_pr_url(&output.stderr) {
            info!(url = %url, "pull request already exists, treating as success");
            (url, true)
        } else {
            let error = format!(
                "gh pr create failed (exit code {}): {}",
                output.exit_code,
                output.stderr.trim()
            );
            warn!("{error}");
            self.emit_failure(context, &error).await;
            return StepResult::fail(error);
        };

        info!(url = %url, existing, "pull request created");

        if let Err(e) = context
            .save_artifact(ArtifactPayload::GhPullRequest {
                url: url.clone(),
                existing,
            })
            .await
        {
            return StepResult::fail(format!("failed to save gh-pull-request artifact: {e}"));
        }

        context
            .notifier
            .emit_and_log(&CommentPayload::workflow(
                context.issue_id,
                &context.adw_id,
                format!("Pull request created: {url}"),
                serde_json::json!({
                    "output": "pull-request-created",
                    "url": url,
                    "existing": existing,
                    "commits": serde_json::to_value(&details.commits).unwrap_or_default(),
                }),
            ))
            .await;

        StepResult::ok()
    }
}
