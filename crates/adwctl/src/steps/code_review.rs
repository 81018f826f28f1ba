//! Code review via the CodeRabbit CLI.

use super::{StepResult, WorkflowContext, WorkflowStep};
use crate::exec::{run_tool, ToolError};
use crate::notify::CommentPayload;
use adw_core::{config, ArtifactKind, ArtifactPayload, CommentSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

pub const CODE_REVIEW_STEP_NAME: &str = "Generating CodeRabbit review";

/// Whether reviewer output indicates no actionable issues.
///
/// A review is clean when it contains `"Review completed"` (the reviewer
/// finished) and does not contain `"File:"` (which precedes per-file
/// comments that need attention).
pub fn is_clean_review(review_text: &str) -> bool {
    review_text.contains("Review completed") && !review_text.contains("File:")
}

/// Shell out to `coderabbit --prompt-only` and capture the review text.
///
/// Best-effort: a missing config, an absent binary, or a timeout fails the
/// step without aborting the workflow. Sets `review_is_clean` in the
/// context so the fix step can short-circuit.
#[derive(Debug, Default)]
pub struct CodeReviewStep;

#[async_trait]
impl WorkflowStep for CodeReviewStep {
    fn name(&self) -> &str {
        CODE_REVIEW_STEP_NAME
    }

    fn is_critical(&self) -> bool {
        false
    }

    async fn run(&self, context: &mut WorkflowContext) -> StepResult {
        // Issue-based workflows review against a plan; a standalone
        // codereview run (no issue id) reviews the checkout as-is.
        if context.issue_id.is_some() {
            let plan = context
                .plan_data(ArtifactKind::Plan)
                .or_else(|| context.plan_data(ArtifactKind::PatchPlan));
            if plan.is_none() {
                return StepResult::fail("no plan data available for issue-based workflow");
            }
        }

        let repo = config::app_root();
        let config_path = repo.join(".coderabbit.yaml");
        if !config_path.exists() {
            return StepResult::fail(format!(
                "CodeRabbit config not found at {}",
                config_path.display()
            ));
        }

        let timeout_secs = config::coderabbit_timeout_secs();
        let config_arg = config_path.display().to_string();
        let mut args = vec!["--prompt-only", "--config", config_arg.as_str()];
        let base_commit = context.data.base_commit.clone();
        if let Some(base) = base_commit.as_deref() {
            args.push("--base-commit");
            args.push(base);
        }

        let output = match run_tool(
            "coderabbit",
            &args,
            &repo,
            &HashMap::new(),
            Some(Duration::from_secs(timeout_secs)),
        )
        .await
        {
            Ok(output) => output,
            Err(ToolError::NotFound(_)) => {
                return StepResult::fail("coderabbit CLI not found on PATH");
            }
            Err(ToolError::TimedOut { secs, .. }) => {
                return StepResult::fail(format!(
                    "CodeRabbit review timed out after {secs} seconds"
                ));
            }
            Err(e) => return StepResult::fail(format!("failed to run coderabbit: {e}")),
        };

        if !output.success() {
            return StepResult::fail(format!(
                "CodeRabbit review failed with code {}: {}",
                output.exit_code,
                output.stderr.trim()
            ));
        }

        let review_text = output.stdout;
        info!(chars = review_text.len(), "CodeRabbit review generated");

        let clean = is_clean_review(&review_text);
        context.data.review_is_clean = clean;
        context.data.review_text = Some(review_text.clone());
        if clean {
            info!("review is clean, no actionable issues detected");
        } else {
            info!("review contains issues that need to be addressed");
        }

        if let Err(e) = context
            .save_artifact(ArtifactPayload::CodeReview {
                review_text: review_text.clone(),
            })
            .await
        {
            return StepResult::fail(format!("failed to save code-review artifact: {e}"));
        }

        // Full review text rides along as an artifact-sourced comment.
        context
            .notifier
            .emit_and_log(
                &CommentPayload::workflow(
                    context.issue_id,
                    &context.adw_id,
                    "CodeRabbit review generated",
                    serde_json::json!({ "review_text": review_text }),
                )
                .with_source(CommentSource::Artifact)
                .with_kind("review"),
            )
            .await;

        context
            .notifier
            .emit_and_log(&CommentPayload::workflow(
                context.issue_id,
                &context.adw_id,
                "CodeRabbit review complete.",
                serde_json::json!({ "clean": clean }),
            ))
            .await;

        StepResult::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_review_is_not_clean() {
        assert!(!is_clean_review(""));
    }

    #[test]
    fn completed_review_without_findings_is_clean() {
        assert!(is_clean_review("Review completed\n...no issues..."));
    }

    #[test]
    fn completed_review_with_file_comments_is_dirty() {
        assert!(!is_clean_review("Review completed\nFile: a.py\nLine 1: tighten"));
    }

    #[test]
    fn unfinished_review_is_not_clean() {
        assert!(!is_clean_review("Reviewing files..."));
    }
}
