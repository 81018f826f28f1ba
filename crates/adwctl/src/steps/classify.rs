//! Issue classification: type and complexity via the envelope agent.

use super::{
    emit_validation_failure, execute_agent_template, StepResult, WorkflowContext, WorkflowStep,
};
use crate::notify::CommentPayload;
use adw_core::json_parser::{parse_and_validate_json, FieldType, RequiredFields};
use adw_core::{schemas, ArtifactPayload, ClassifyData, Complexity, IssueClass};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};

pub const CLASSIFY_STEP_NAME: &str = "Classifying issue";

const AGENT_CLASSIFIER: &str = "classifier";

fn required_fields() -> RequiredFields {
    [
        ("output", FieldType::String),
        ("type", FieldType::String),
        ("level", FieldType::String),
    ]
    .into_iter()
    .collect()
}

/// Parse and validate the classification object into typed data.
///
/// Rejects unknown class or level values; the `(type, level)` pair drives
/// template selection downstream, so a bogus value here must stop the run.
pub fn classify_from_value(value: &Value) -> Result<ClassifyData, String> {
    let output = value["output"].as_str().unwrap_or_default().to_string();
    let class_raw = value["type"].as_str().unwrap_or_default();
    let level_raw = value["level"].as_str().unwrap_or_default();

    let issue_class = IssueClass::parse(class_raw)
        .ok_or_else(|| format!("Invalid issue type: '{class_raw}'"))?;
    let level = Complexity::parse(level_raw)
        .ok_or_else(|| format!("Invalid complexity level: '{level_raw}'"))?;

    Ok(ClassifyData {
        output,
        issue_class,
        level,
    })
}

/// Classify the issue as `{bug, chore, feature}` × `{simple, average,
/// complex, critical}`; the pair selects the planning template.
#[derive(Debug, Default)]
pub struct ClassifyStep;

#[async_trait]
impl WorkflowStep for ClassifyStep {
    fn name(&self) -> &str {
        CLASSIFY_STEP_NAME
    }

    async fn run(&self, context: &mut WorkflowContext) -> StepResult {
        let Some(issue) = context.issue() else {
            return StepResult::fail("issue not available");
        };

        let response = execute_agent_template(
            context,
            AGENT_CLASSIFIER,
            "/adw-classify-issue",
            &[&issue.description],
            Some("sonnet"),
            Some(schemas::CLASSIFY_SCHEMA),
            "claude",
        )
        .await;

        if !response.success {
            return StepResult::fail(format!(
                "classification agent failed: {}",
                response.error_detail.unwrap_or(response.output)
            ));
        }

        let parse_result =
            parse_and_validate_json(&response.output, &required_fields(), Some("classify"));
        let Some(value) = parse_result.data else {
            let detail = parse_result.error.unwrap_or_else(|| "invalid output".to_string());
            emit_validation_failure(
                &context.notifier,
                context.issue_id,
                &context.adw_id,
                "Classification",
                &response.output,
                &detail,
            )
            .await;
            return StepResult::fail(detail);
        };

        let classify = match classify_from_value(&value) {
            Ok(classify) => classify,
            Err(detail) => {
                error!("{detail}");
                emit_validation_failure(
                    &context.notifier,
                    context.issue_id,
                    &context.adw_id,
                    "Classification",
                    &response.output,
                    &detail,
                )
                .await;
                return StepResult::fail(detail);
            }
        };

        let command = classify.plan_command();
        info!(
            class = classify.issue_class.as_str(),
            level = classify.level.as_str(),
            command = %command,
            "issue classified"
        );

        context.data.classify = Some(classify.clone());
        if let Err(e) = context
            .save_artifact(ArtifactPayload::Classify { classify: classify.clone() })
            .await
        {
            return StepResult::fail(format!("failed to save classify artifact: {e}"));
        }

        context
            .notifier
            .emit_and_log(
                &CommentPayload::workflow(
                    context.issue_id,
                    &context.adw_id,
                    format!(
                        "Issue classified as {} ({}) -> {command}",
                        classify.issue_class.as_str(),
                        classify.level.as_str()
                    ),
                    serde_json::json!({
                        "type": classify.issue_class.as_str(),
                        "level": classify.level.as_str(),
                        "command": command,
                    }),
                )
                .with_kind("classify"),
            )
            .await;

        StepResult::ok_with_parsed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_classification_parses() {
        let value = serde_json::json!({
            "output": "classify", "type": "feature", "level": "simple"
        });
        let classify = classify_from_value(&value).unwrap();
        assert_eq!(classify.issue_class, IssueClass::Feature);
        assert_eq!(classify.level, Complexity::Simple);
        assert_eq!(classify.plan_command(), "/adw-feature-plan");
    }

    #[test]
    fn bogus_level_is_rejected() {
        let value = serde_json::json!({
            "output": "classify", "type": "feature", "level": "bogus"
        });
        let err = classify_from_value(&value).unwrap_err();
        assert!(err.contains("Invalid complexity level"));
    }

    #[test]
    fn bogus_type_is_rejected() {
        let value = serde_json::json!({
            "output": "classify", "type": "epic", "level": "simple"
        });
        let err = classify_from_value(&value).unwrap_err();
        assert!(err.contains("Invalid issue type"));
    }
}
