//! Git environment setup: base branch sync and the per-workflow branch.

use super::{StepResult, WorkflowContext, WorkflowStep};
use crate::exec::{run_git, ToolError};
use crate::notify::CommentPayload;
use adw_core::{config, ArtifactPayload};
use async_trait::async_trait;
use tracing::{info, warn};

pub const GIT_SETUP_STEP_NAME: &str = "Setting up git environment";

/// Prepare the repository for a workflow run.
///
/// Fetches the remote, optionally hard-resets the base branch (gated by
/// `ALLOW_DESTRUCTIVE_GIT_OPS`), and checks out a fresh branch named after
/// the workflow id. The branch name is recorded on the issue row
/// best-effort.
#[derive(Debug, Default)]
pub struct GitSetupStep;

#[async_trait]
impl WorkflowStep for GitSetupStep {
    fn name(&self) -> &str {
        GIT_SETUP_STEP_NAME
    }

    async fn run(&self, context: &mut WorkflowContext) -> StepResult {
        let repo = config::app_root();
        let base_branch = config::default_git_branch();
        let branch = context.adw_id.to_string();

        match run_git(&repo, &["fetch", "origin"], None).await {
            Ok(output) if !output.success() => {
                warn!(stderr = %output.stderr.trim(), "git fetch failed, continuing with local refs");
            }
            Err(ToolError::NotFound(_)) => {
                return StepResult::fail("git not found on PATH");
            }
            Err(e) => return StepResult::fail(format!("git fetch failed: {e}")),
            Ok(_) => {}
        }

        // The destructive path reclaims a shared checkout: reset the base
        // branch to the remote before branching off it.
        let mut reset_performed = false;
        if config::allow_destructive_git_ops() {
            match run_git(&repo, &["checkout", &base_branch], None).await {
                Ok(output) if output.success() => {}
                Ok(output) => {
                    return StepResult::fail(format!(
                        "failed to check out base branch {base_branch}: {}",
                        output.stderr.trim()
                    ));
                }
                Err(e) => return StepResult::fail(format!("git checkout failed: {e}")),
            }
            let remote_ref = format!("origin/{base_branch}");
            match run_git(&repo, &["reset", "--hard", &remote_ref], None).await {
                Ok(output) if output.success() => {
                    info!(base = %base_branch, "reset base branch to remote");
                    reset_performed = true;
                }
                Ok(output) => {
                    return StepResult::fail(format!(
                        "git reset --hard {remote_ref} failed: {}",
                        output.stderr.trim()
                    ));
                }
                Err(e) => return StepResult::fail(format!("git reset failed: {e}")),
            }
        } else {
            info!("destructive git ops not enabled, skipping base branch reset");
        }

        // Create (or reuse) the workflow branch.
        match run_git(&repo, &["checkout", "-b", &branch], None).await {
            Ok(output) if output.success() => {}
            Ok(_) => {
                // Branch may already exist from a requeued run.
                match run_git(&repo, &["checkout", &branch], None).await {
                    Ok(output) if output.success() => {
                        info!(branch = %branch, "reusing existing workflow branch");
                    }
                    Ok(output) => {
                        return StepResult::fail(format!(
                            "failed to create branch {branch}: {}",
                            output.stderr.trim()
                        ));
                    }
                    Err(e) => return StepResult::fail(format!("git checkout failed: {e}")),
                }
            }
            Err(e) => return StepResult::fail(format!("git checkout failed: {e}")),
        }

        // Record the branch on the issue row; never fatal.
        if let (Some(issue_id), Some(store)) = (context.issue_id, context.issue_store.as_ref()) {
            if let Err(e) = store.update_issue_branch(issue_id, &branch).await {
                warn!(error = %e, issue_id, "failed to record workflow branch on issue");
            }
        }

        if let Err(e) = context
            .save_artifact(ArtifactPayload::GitSetup {
                branch: branch.clone(),
                base_branch: base_branch.clone(),
                reset_performed,
            })
            .await
        {
            return StepResult::fail(format!("failed to save git-setup artifact: {e}"));
        }

        context
            .notifier
            .emit_and_log(&CommentPayload::workflow(
                context.issue_id,
                &context.adw_id,
                format!("Git environment ready on branch {branch}"),
                serde_json::json!({
                    "branch": branch,
                    "base_branch": base_branch,
                    "reset_performed": reset_performed,
                }),
            ))
            .await;

        StepResult::ok()
    }
}
