//! Patch-workflow finale: compose commit messages and push to the existing
//! PR/MR. Never creates a new pull request.

use super::gh_pull_request::{PLATFORM_CLI_TIMEOUT, PUSH_TIMEOUT};
use super::{
    emit_validation_failure, execute_agent_template, StepResult, WorkflowContext, WorkflowStep,
};
use crate::exec::{run_tool, ToolError};
use crate::notify::CommentPayload;
use adw_core::json_parser::{parse_and_validate_json, FieldType, RequiredFields};
use adw_core::{config, schemas, ArtifactPayload, Platform};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

pub const COMPOSE_COMMITS_STEP_NAME: &str = "Pushing patch commits";

const AGENT_PR_COMPOSER: &str = "pr_composer";

fn required_fields() -> RequiredFields {
    [("output", FieldType::String)].into_iter().collect()
}

/// Extract the PR/MR URL from the platform CLI's JSON view output.
pub fn parse_pr_view_url(platform: Platform, stdout: &str) -> Option<String> {
    let value: Value = serde_json::from_str(stdout.trim()).ok()?;
    let key = match platform {
        Platform::Github => "url",
        Platform::Gitlab => "web_url",
    };
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

/// Detect the parent run's PR, compose commit messages via the agent, and
/// push the patch branch onto it.
#[derive(Debug, Default)]
pub struct ComposeCommitsStep;

impl ComposeCommitsStep {
    async fn emit_skip(&self, context: &WorkflowContext, reason: &str) {
        info!("{reason}");
        context
            .notifier
            .emit_and_log(&CommentPayload::workflow(
                context.issue_id,
                &context.adw_id,
                reason,
                serde_json::json!({ "output": "compose-commits-skipped", "reason": reason }),
            ))
            .await;
    }
}

#[async_trait]
impl WorkflowStep for ComposeCommitsStep {
    fn name(&self) -> &str {
        COMPOSE_COMMITS_STEP_NAME
    }

    fn is_critical(&self) -> bool {
        false
    }

    async fn run(&self, context: &mut WorkflowContext) -> StepResult {
        let Some(platform) = config::platform() else {
            self.emit_skip(context, "commit push skipped: no platform selected")
                .await;
            return StepResult::ok();
        };

        let repo = config::app_root();
        let (program, args, env): (&str, Vec<&str>, HashMap<String, String>) = match platform {
            Platform::Github => (
                "gh",
                vec!["pr", "view", "--json", "url"],
                config::github_pat()
                    .map(|pat| [("GH_TOKEN".to_string(), pat)].into_iter().collect())
                    .unwrap_or_default(),
            ),
            Platform::Gitlab => (
                "glab",
                vec!["mr", "view", "--output", "json"],
                config::gitlab_pat()
                    .map(|pat| [("GITLAB_TOKEN".to_string(), pat)].into_iter().collect())
                    .unwrap_or_default(),
            ),
        };

        let view = match run_tool(program, &args, &repo, &env, Some(PLATFORM_CLI_TIMEOUT)).await {
            Ok(output) => output,
            Err(ToolError::NotFound(_)) => {
                self.emit_skip(
                    context,
                    &format!("commit push skipped: {program} CLI not found on PATH"),
                )
                .await;
                return StepResult::ok();
            }
            Err(e) => return StepResult::fail(format!("{program} view failed: {e}")),
        };

        let pr_url = if view.success() {
            parse_pr_view_url(platform, &view.stdout)
        } else {
            None
        };
        let Some(pr_url) = pr_url else {
            self.emit_skip(
                context,
                "commit push skipped: no existing PR/MR found for this branch",
            )
            .await;
            return StepResult::ok();
        };
        info!(url = %pr_url, "found existing PR for patch commits");

        let response = execute_agent_template(
            context,
            AGENT_PR_COMPOSER,
            "/adw-compose-commits",
            &[],
            Some("sonnet"),
            Some(schemas::COMPOSE_COMMITS_SCHEMA),
            "claude",
        )
        .await;
        if !response.success {
            return StepResult::fail(format!(
                "commit composition failed: {}",
                response.error_detail.unwrap_or(response.output)
            ));
        }

        let parse_result =
            parse_and_validate_json(&response.output, &required_fields(), Some("compose-commits"));
        let Some(value) = parse_result.data else {
            let detail = parse_result.error.unwrap_or_else(|| "invalid output".to_string());
            emit_validation_failure(
                &context.notifier,
                context.issue_id,
                &context.adw_id,
                "Commit composition",
                &response.output,
                &detail,
            )
            .await;
            return StepResult::fail(detail);
        };
        let output_text = value["output"].as_str().unwrap_or_default().to_string();

        let push = run_tool(
            "git",
            &["push", "origin", "HEAD"],
            &repo,
            &env,
            Some(PUSH_TIMEOUT),
        )
        .await;
        let pushed = matches!(&push, Ok(output) if output.success());
        if !pushed {
            let error = match push {
                Ok(output) => format!(
                    "git push failed (exit code {}): {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
                Err(e) => format!("git push failed: {e}"),
            };
            context
                .notifier
                .emit_and_log(&CommentPayload::workflow(
                    context.issue_id,
                    &context.adw_id,
                    &error,
                    serde_json::json!({ "output": "compose-commits-failed", "error": error }),
                ))
                .await;
            return StepResult::fail(error);
        }

        if let Err(e) = context
            .save_artifact(ArtifactPayload::ComposeCommits {
                output: output_text,
                pushed,
                pr_url: Some(pr_url.clone()),
            })
            .await
        {
            return StepResult::fail(format!("failed to save compose-commits artifact: {e}"));
        }

        context
            .notifier
            .emit_and_log(&CommentPayload::workflow(
                context.issue_id,
                &context.adw_id,
                format!("Patch commits pushed to {pr_url}"),
                serde_json::json!({
                    "output": "compose-commits-pushed",
                    "url": pr_url,
                }),
            ))
            .await;

        StepResult::ok_with_parsed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_view_url_parses() {
        let stdout = r#"{"url": "https://example/pr/42"}"#;
        assert_eq!(
            parse_pr_view_url(Platform::Github, stdout),
            Some("https://example/pr/42".to_string())
        );
    }

    #[test]
    fn gitlab_view_url_parses() {
        let stdout = r#"{"web_url": "https://example/mr/9", "iid": 9}"#;
        assert_eq!(
            parse_pr_view_url(Platform::Gitlab, stdout),
            Some("https://example/mr/9".to_string())
        );
    }

    #[test]
    fn missing_or_garbage_view_output_is_none() {
        assert_eq!(parse_pr_view_url(Platform::Github, "no pr found"), None);
        assert_eq!(parse_pr_view_url(Platform::Github, r#"{"other": 1}"#), None);
        assert_eq!(parse_pr_view_url(Platform::Gitlab, r#"{"web_url": ""}"#), None);
    }
}
