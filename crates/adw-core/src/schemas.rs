//! JSON schema constants for structured agent output.
//!
//! Passed verbatim to the envelope provider's `--json-schema` flag so the
//! agent CLI enforces the shape before we ever see the output. The validator
//! in [`crate::json_parser`] re-checks the required fields on our side.

/// Classify step output: issue class and complexity level.
pub const CLASSIFY_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "type": "object",
  "properties": {
    "output": { "type": "string", "const": "classify" },
    "type": { "type": "string", "enum": ["chore", "bug", "feature"] },
    "level": { "type": "string", "enum": ["simple", "average", "complex", "critical"] }
  },
  "required": ["output", "type", "level"],
  "additionalProperties": false
}"#;

/// Plan output, shared by plan and patch-plan.
pub const PLAN_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "type": "object",
  "properties": {
    "output": { "type": "string" },
    "plan": { "type": "string", "description": "Implementation plan in markdown" },
    "summary": { "type": "string" }
  },
  "required": ["output", "plan", "summary"],
  "additionalProperties": true
}"#;

/// Implement step output.
pub const IMPLEMENT_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "type": "object",
  "properties": {
    "files_modified": { "type": "array", "items": { "type": "string" } },
    "git_diff_stat": { "type": "string" },
    "output": { "type": "string" },
    "status": { "type": "string", "enum": ["success", "partial", "failed"] },
    "summary": { "type": "string" }
  },
  "required": ["files_modified", "git_diff_stat", "output", "status", "summary"],
  "additionalProperties": true
}"#;

/// Review-fix step output: per-issue resolutions.
pub const REVIEW_FIX_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "type": "object",
  "properties": {
    "issues": {
      "type": "array",
      "items": {
        "type": "object",
        "properties": {
          "file": { "type": "string" },
          "lines": { "type": "string" },
          "type": { "type": "string" },
          "status": { "type": "string", "enum": ["fixed", "skipped", "needs-followup"] },
          "notes": { "type": "string" }
        },
        "required": ["file", "lines", "type", "status", "notes"]
      }
    },
    "output": { "type": "string", "const": "implement-review" },
    "summary": { "type": "string" }
  },
  "required": ["issues", "output", "summary"],
  "additionalProperties": true
}"#;

/// Code-quality step output: per-tool results.
pub const CODE_QUALITY_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "type": "object",
  "properties": {
    "output": { "type": "string" },
    "tools": {
      "type": "array",
      "items": {
        "type": "object",
        "properties": {
          "name": { "type": "string" },
          "status": { "type": "string" },
          "output": { "type": "string" }
        },
        "required": ["name", "status"]
      }
    }
  },
  "required": ["output", "tools"],
  "additionalProperties": true
}"#;

/// Acceptance validation output: requirement checklist and verdict.
pub const ACCEPTANCE_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "type": "object",
  "properties": {
    "output": { "type": "string" },
    "notes": { "type": "array", "items": { "type": "string" } },
    "plan_title": { "type": "string" },
    "requirements": {
      "type": "array",
      "items": {
        "type": "object",
        "properties": {
          "description": { "type": "string" },
          "met": { "type": "boolean" },
          "blocking": { "type": "boolean" }
        },
        "required": ["description", "met"]
      }
    },
    "status": { "type": "string", "enum": ["pass", "fail", "partial"] },
    "summary": { "type": "string" },
    "unmet_blocking_requirements": { "type": "array", "items": { "type": "string" } }
  },
  "required": ["output", "notes", "plan_title", "requirements", "status", "summary", "unmet_blocking_requirements"],
  "additionalProperties": true
}"#;

/// Compose-request output: PR title, summary, planned commits.
pub const COMPOSE_REQUEST_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "type": "object",
  "properties": {
    "output": { "type": "string" },
    "title": { "type": "string" },
    "summary": { "type": "string" },
    "commits": {
      "type": "array",
      "items": {
        "type": "object",
        "properties": {
          "message": { "type": "string" },
          "files": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["message"]
      }
    }
  },
  "required": ["output", "title", "summary", "commits"],
  "additionalProperties": true
}"#;

/// Compose-commits output for the patch workflow.
pub const COMPOSE_COMMITS_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "type": "object",
  "properties": {
    "output": { "type": "string" }
  },
  "required": ["output"],
  "additionalProperties": true
}"#;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    const ALL_SCHEMAS: [(&str, &str); 8] = [
        ("classify", CLASSIFY_SCHEMA),
        ("plan", PLAN_SCHEMA),
        ("implement", IMPLEMENT_SCHEMA),
        ("review-fix", REVIEW_FIX_SCHEMA),
        ("code-quality", CODE_QUALITY_SCHEMA),
        ("acceptance", ACCEPTANCE_SCHEMA),
        ("compose-request", COMPOSE_REQUEST_SCHEMA),
        ("compose-commits", COMPOSE_COMMITS_SCHEMA),
    ];

    #[test]
    fn every_schema_is_valid_json() {
        for (name, schema) in ALL_SCHEMAS {
            let parsed: Value = serde_json::from_str(schema)
                .unwrap_or_else(|e| panic!("schema {name} is not valid JSON: {e}"));
            assert_eq!(parsed["type"], "object", "schema {name} must describe an object");
            assert!(parsed["required"].is_array(), "schema {name} must list required fields");
        }
    }

    #[test]
    fn acceptance_status_uses_pass_fail_partial() {
        let parsed: Value = serde_json::from_str(ACCEPTANCE_SCHEMA).unwrap();
        let statuses = parsed["properties"]["status"]["enum"].as_array().unwrap();
        let values: Vec<&str> = statuses.iter().filter_map(Value::as_str).collect();
        assert_eq!(values, vec!["pass", "fail", "partial"]);
    }
}
