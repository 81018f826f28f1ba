//! Acceptance validation against the implementation plan.

use super::{
    emit_validation_failure, execute_agent_template, StepResult, WorkflowContext, WorkflowStep,
};
use crate::notify::CommentPayload;
use adw_core::json_parser::{parse_and_validate_json, FieldType, RequiredFields};
use adw_core::{schemas, ArtifactKind, ArtifactPayload};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

pub const ACCEPTANCE_STEP_NAME: &str = "Validating acceptance criteria";
pub const PATCH_ACCEPTANCE_STEP_NAME: &str = "Validating patch acceptance";

const AGENT_ACCEPTANCE: &str = "acceptance";

fn required_fields() -> RequiredFields {
    [
        ("output", FieldType::String),
        ("notes", FieldType::Array),
        ("plan_title", FieldType::String),
        ("requirements", FieldType::Array),
        ("status", FieldType::String),
        ("summary", FieldType::String),
        ("unmet_blocking_requirements", FieldType::Array),
    ]
    .into_iter()
    .collect()
}

/// Derive the pass/fail flag and message from a validated acceptance object.
pub fn acceptance_verdict(value: &Value) -> (bool, String) {
    let status = value["status"].as_str().unwrap_or("fail");
    let summary = value["summary"].as_str().unwrap_or_default();
    let unmet: Vec<&str> = value["unmet_blocking_requirements"]
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let success = status == "pass";
    let message = if unmet.is_empty() {
        format!("{status}: {summary}")
    } else {
        format!("{status}: {summary} (unmet blocking: {})", unmet.join("; "))
    };
    (success, message)
}

/// Run the acceptance-validation agent against the plan.
///
/// The patch flavour validates against the patch plan and stores the
/// `patch-acceptance` artifact; both flavours are best-effort.
#[derive(Debug)]
pub struct AcceptanceStep {
    patch: bool,
}

impl AcceptanceStep {
    pub fn main() -> Self {
        Self { patch: false }
    }

    pub fn patch() -> Self {
        Self { patch: true }
    }
}

#[async_trait]
impl WorkflowStep for AcceptanceStep {
    fn name(&self) -> &str {
        if self.patch {
            PATCH_ACCEPTANCE_STEP_NAME
        } else {
            ACCEPTANCE_STEP_NAME
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    async fn run(&self, context: &mut WorkflowContext) -> StepResult {
        let plan_kind = if self.patch {
            ArtifactKind::PatchPlan
        } else {
            ArtifactKind::Plan
        };
        let Some(plan) = context.plan_data(plan_kind) else {
            return StepResult::fail("plan not available for acceptance validation");
        };

        let response = execute_agent_template(
            context,
            AGENT_ACCEPTANCE,
            "/adw-validate-acceptance",
            &[&plan.plan],
            Some("sonnet"),
            Some(schemas::ACCEPTANCE_SCHEMA),
            "claude",
        )
        .await;

        if !response.success {
            return StepResult::fail(format!(
                "acceptance agent failed: {}",
                response.error_detail.unwrap_or(response.output)
            ));
        }

        let parse_result =
            parse_and_validate_json(&response.output, &required_fields(), Some("acceptance"));
        let Some(value) = parse_result.data else {
            let detail = parse_result.error.unwrap_or_else(|| "invalid output".to_string());
            emit_validation_failure(
                &context.notifier,
                context.issue_id,
                &context.adw_id,
                "Acceptance validation",
                &response.output,
                &detail,
            )
            .await;
            return StepResult::fail(detail);
        };

        let (success, message) = acceptance_verdict(&value);
        if success {
            info!("acceptance validation passed");
        } else {
            warn!(message = %message, "acceptance validation did not pass");
        }

        let payload = if self.patch {
            ArtifactPayload::PatchAcceptance {
                success,
                message: Some(message.clone()),
            }
        } else {
            ArtifactPayload::Acceptance {
                success,
                message: Some(message.clone()),
            }
        };
        if let Err(e) = context.save_artifact(payload).await {
            return StepResult::fail(format!("failed to save acceptance artifact: {e}"));
        }

        context
            .notifier
            .emit_and_log(&CommentPayload::workflow(
                context.issue_id,
                &context.adw_id,
                "Plan acceptance validation completed",
                serde_json::json!({
                    "status": value["status"],
                    "message": message,
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
    fn pass_status_is_success() {
        let value = serde_json::json!({
            "status": "pass",
            "summary": "all requirements met",
            "unmet_blocking_requirements": []
        });
        let (success, message) = acceptance_verdict(&value);
        assert!(success);
        assert!(message.starts_with("pass:"));
    }

    #[test]
    fn partial_status_reports_unmet_requirements() {
        let value = serde_json::json!({
            "status": "partial",
            "summary": "most requirements met",
            "unmet_blocking_requirements": ["toggle persists preference"]
        });
        let (success, message) = acceptance_verdict(&value);
        assert!(!success);
        assert!(message.contains("unmet blocking"));
        assert!(message.contains("toggle persists preference"));
    }

    #[test]
    fn acceptance_schema_fields_are_enforced() {
        let result = parse_and_validate_json(
            r#"{"status": "pass", "summary": "ok"}"#,
            &required_fields(),
            Some("acceptance"),
        );
        assert!(!result.success);
    }
}
