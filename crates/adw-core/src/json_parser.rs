//! Tolerant extraction and validation of JSON objects from agent output.
//!
//! Agents are asked for structured JSON but routinely wrap it in markdown
//! fences, conversational prose, or escaped text. The sanitizer peels those
//! layers off; the validator then checks required fields against expected
//! runtime types.

use serde_json::Value;
use std::collections::BTreeMap;

/// Expected runtime type of a required field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Bool,
    Array,
    Object,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// Required-field map keyed by field name. Ordered so error messages are
/// stable.
pub type RequiredFields = BTreeMap<&'static str, FieldType>;

/// Outcome of parse-and-validate. Mirrors the step-result shape: either the
/// parsed object or a human-readable error.
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl ParseResult {
    fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn fail(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Strip markdown fences and surrounding prose from agent output, leaving the
/// best candidate JSON object text.
///
/// Stages, first success wins:
/// 1. trim whitespace
/// 2. unwrap a fenced code block (with optional language tag)
/// 3. trim prose before the first `{` and after the last `}`
/// 4. if the text carries escape sequences (`\n`, `\"`), unescape and retry
pub fn sanitize_json_output(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let unfenced = strip_code_fence(trimmed);
    let candidate = trim_to_braces(unfenced);

    if serde_json::from_str::<Value>(&candidate).is_ok() {
        return candidate;
    }

    // Agent output sometimes arrives double-escaped (literal \n and \" in the
    // text). Unescape once and retry the brace extraction.
    if trimmed.contains("\\n") || trimmed.contains("\\\"") {
        let unescaped = unescape(trimmed);
        let retried = trim_to_braces(strip_code_fence(unescaped.trim()));
        if serde_json::from_str::<Value>(&retried).is_ok() {
            return retried;
        }
    }

    candidate
}

/// Remove a surrounding markdown code fence, tolerating prose outside it.
fn strip_code_fence(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    // Skip the optional language tag on the opening fence line.
    let after_open = &text[open + 3..];
    let body_start = after_open.find('\n').map_or(0, |i| i + 1);
    let body = &after_open[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => text,
    }
}

/// Trim to the outermost `{ ... }` span, dropping prose on either side.
fn trim_to_braces(text: &str) -> String {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => text[start..=end].to_string(),
        _ => text.to_string(),
    }
}

/// Decode literal `\n`, `\"`, `\t`, `\\` sequences.
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('n') => {
                chars.next();
                out.push('\n');
            }
            Some('t') => {
                chars.next();
                out.push('\t');
            }
            Some('"') => {
                chars.next();
                out.push('"');
            }
            Some('\\') => {
                chars.next();
                out.push('\\');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Extract a JSON object from noisy output and validate required fields.
///
/// `step_name` is included in error messages so validation failures point at
/// the step that produced the output.
pub fn parse_and_validate_json(
    output: &str,
    required_fields: &RequiredFields,
    step_name: Option<&str>,
) -> ParseResult {
    let label = step_name.unwrap_or("agent output");
    let sanitized = sanitize_json_output(output);

    if sanitized.is_empty() {
        return ParseResult::fail(format!("{label}: output is empty"));
    }

    let value: Value = match serde_json::from_str(&sanitized) {
        Ok(v) => v,
        Err(e) => {
            return ParseResult::fail(format!("{label}: output is not valid JSON: {e}"));
        }
    };

    let Some(object) = value.as_object() else {
        return ParseResult::fail(format!("{label}: expected a JSON object at the root"));
    };

    for (field, expected) in required_fields {
        match object.get(*field) {
            None => {
                return ParseResult::fail(format!("{label}: missing required field '{field}'"));
            }
            Some(found) if !expected.matches(found) => {
                return ParseResult::fail(format!(
                    "{label}: field '{field}' should be a {}, got {found}",
                    expected.name()
                ));
            }
            Some(_) => {}
        }
    }

    ParseResult::ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&'static str, FieldType)]) -> RequiredFields {
        pairs.iter().copied().collect()
    }

    #[test]
    fn plain_json_passes_through() {
        let output = r#"{"type": "feature", "level": "simple"}"#;
        assert_eq!(sanitize_json_output(output), output);
    }

    #[test]
    fn strips_json_fence() {
        let output = "```json\n{\"type\": \"feature\"}\n```";
        assert_eq!(sanitize_json_output(output), r#"{"type": "feature"}"#);
    }

    #[test]
    fn strips_plain_fence() {
        let output = "```\n{\"type\": \"feature\"}\n```";
        assert_eq!(sanitize_json_output(output), r#"{"type": "feature"}"#);
    }

    #[test]
    fn trims_leading_prose() {
        let output = "Here is the classification result:\n{\"type\": \"bug\"}";
        assert_eq!(sanitize_json_output(output), r#"{"type": "bug"}"#);
    }

    #[test]
    fn trims_trailing_prose() {
        let output = "{\"type\": \"bug\"}\nI hope this helps!";
        assert_eq!(sanitize_json_output(output), r#"{"type": "bug"}"#);
    }

    #[test]
    fn trims_surrounding_prose_and_fence() {
        let output =
            "Perfect! Here is the JSON output:\n\n```json\n{\"status\": \"pass\"}\n```\n\nDone!";
        assert_eq!(sanitize_json_output(output), r#"{"status": "pass"}"#);
    }

    #[test]
    fn handles_empty_and_whitespace() {
        assert_eq!(sanitize_json_output(""), "");
        assert_eq!(sanitize_json_output("  \n\n "), "");
    }

    #[test]
    fn no_json_object_returns_input() {
        let output = "Just some plain text";
        assert_eq!(sanitize_json_output(output), output);
    }

    #[test]
    fn unescapes_double_escaped_json() {
        let output = r#"prose text\n\n{\"key\":\"value\"}"#;
        assert_eq!(sanitize_json_output(output), r#"{"key":"value"}"#);
    }

    #[test]
    fn validates_required_fields() {
        let required = fields(&[("output", FieldType::String), ("level", FieldType::String)]);
        let result = parse_and_validate_json(
            r#"{"output": "classify", "level": "simple"}"#,
            &required,
            Some("classify"),
        );
        assert!(result.success);
        assert_eq!(result.data.unwrap()["level"], "simple");
    }

    #[test]
    fn rejects_missing_field_with_step_name() {
        let required = fields(&[("plan", FieldType::String)]);
        let result = parse_and_validate_json(r#"{"summary": "x"}"#, &required, Some("plan"));
        assert!(!result.success);
        let err = result.error.unwrap();
        assert!(err.contains("plan:"));
        assert!(err.contains("'plan'"));
    }

    #[test]
    fn rejects_wrong_field_type() {
        let required = fields(&[("files_modified", FieldType::Array)]);
        let result =
            parse_and_validate_json(r#"{"files_modified": "ui.css"}"#, &required, None);
        assert!(!result.success);
        assert!(result.error.unwrap().contains("array"));
    }

    #[test]
    fn rejects_non_object_root() {
        let required = fields(&[]);
        let result = parse_and_validate_json(r#"["a", "b"]"#, &required, None);
        assert!(!result.success);
        assert!(result.error.unwrap().contains("JSON object"));
    }

    #[test]
    fn rejects_unparseable_output() {
        let required = fields(&[("output", FieldType::String)]);
        let result = parse_and_validate_json("total nonsense", &required, Some("implement"));
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("implement:"));
    }

    #[test]
    fn extraction_round_trips_wrapped_objects() {
        let object = serde_json::json!({"output": "plan", "summary": "adds toggle"});
        let serialized = serde_json::to_string(&object).unwrap();
        for wrapped in [
            serialized.clone(),
            format!("Leading prose.\n{serialized}\ntrailing prose"),
            format!("```json\n{serialized}\n```"),
            format!("Note first:\n```\n{serialized}\n```\nnote after"),
        ] {
            let extracted = sanitize_json_output(&wrapped);
            let reparsed: Value = serde_json::from_str(&extracted).unwrap();
            assert_eq!(reparsed, object, "failed for wrapping: {wrapped}");
        }
    }
}
