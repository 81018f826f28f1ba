//! Envelope provider: the Claude Code CLI.
//!
//! Invoked synchronously with `--output-format json`; stdout must contain a
//! single JSON envelope whose `structured_output` field carries the agent's
//! answer. The subprocess runs from the repository root with a filtered
//! environment so only variables the CLI actually needs are forwarded.

use super::{AgentRequest, AgentResponse, CodingAgent, StreamHandler};
use adw_core::{config, paths};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, warn};

#[derive(Debug)]
pub struct ClaudeAgent;

/// Environment variables forwarded to the CLI when present.
const FORWARDED_VARS: [&str; 7] = [
    "ANTHROPIC_API_KEY",
    "HOME",
    "USER",
    "PATH",
    "SHELL",
    "TERM",
    "E2B_API_KEY",
];

/// Build the filtered environment for the agent subprocess.
///
/// `GITHUB_PAT` is mirrored into `GH_TOKEN` because the CLI's git tooling
/// reads the latter.
pub fn filtered_env() -> HashMap<String, String> {
    let mut env: HashMap<String, String> = FORWARDED_VARS
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|v| ((*key).to_string(), v)))
        .collect();

    env.insert("CLAUDE_CODE_PATH".to_string(), config::claude_path());
    env.entry("CLAUDE_BASH_MAINTAIN_PROJECT_WORKING_DIR".to_string())
        .or_insert_with(|| "true".to_string());

    if let Some(pat) = config::github_pat() {
        env.insert("GH_TOKEN".to_string(), pat.clone());
        env.insert("GITHUB_PAT".to_string(), pat);
    }
    env
}

/// Extract the leading slash command (`/word`) from a prompt, if any.
pub fn slash_command(prompt: &str) -> Option<&str> {
    let rest = prompt.strip_prefix('/')?;
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    Some(&prompt[..end + 1])
}

/// Mirror a slash-command prompt to the per-workflow prompt log.
fn save_prompt(request: &AgentRequest) {
    let Some(command) = slash_command(&request.prompt) else {
        return;
    };
    let path = paths::prompt_file(
        &config::data_dir(),
        &request.adw_id,
        &request.agent_name,
        command,
    );
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!(error = %e, "failed to create prompt log directory");
            return;
        }
    }
    match fs::write(&path, &request.prompt) {
        Ok(()) => debug!(path = %path.display(), "saved prompt"),
        Err(e) => warn!(error = %e, path = %path.display(), "failed to save prompt"),
    }
}

/// Parse the CLI's JSON envelope from a finished subprocess.
///
/// Rules, in order: empty stdout fails with stderr as detail; non-JSON
/// fails; a non-object or `type != "result"` fails; `is_error` fails with
/// the envelope's `result` text; missing `structured_output` fails;
/// otherwise the structured output (re-stringified when it is an object)
/// becomes the response output. Non-success subtypes only warn.
pub fn parse_envelope(stdout: &str, stderr: &str, exit_code: i32) -> AgentResponse {
    let stdout = stdout.trim();
    let stderr = stderr.trim();

    if stdout.is_empty() {
        let detail = if stderr.is_empty() {
            format!("process exited with code {exit_code}")
        } else {
            stderr.to_string()
        };
        return AgentResponse::failure(format!("Claude Code error: {detail}"));
    }

    let envelope: Value = match serde_json::from_str(stdout) {
        Ok(v) => v,
        Err(e) => {
            let detail = format!("invalid JSON in Claude Code output: {e}");
            let preview: String = stdout.chars().take(500).collect();
            error!(detail = %detail, preview = %preview, "envelope parse failed");
            return AgentResponse::failure(format!("Claude Code error: {detail}"));
        }
    };

    let Some(object) = envelope.as_object() else {
        return AgentResponse::failure("Claude Code error: expected a JSON object envelope");
    };

    let session_id = object
        .get("session_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    let envelope_type = object.get("type").and_then(Value::as_str);
    if envelope_type != Some("result") {
        let detail = format!(
            "expected envelope type 'result', got '{}'",
            envelope_type.unwrap_or("<missing>")
        );
        return AgentResponse {
            output: format!("Claude Code error: {detail}"),
            success: false,
            session_id,
            raw_output_path: None,
            error_detail: Some(detail),
        };
    }

    let subtype = object.get("subtype").and_then(Value::as_str);
    if let Some(subtype) = subtype {
        if subtype != "success" {
            warn!(
                subtype,
                session_id = session_id.as_deref().unwrap_or(""),
                duration_ms = object.get("duration_ms").and_then(serde_json::Value::as_u64),
                "Claude Code returned non-success subtype"
            );
        }
    }

    if object.get("is_error").and_then(Value::as_bool).unwrap_or(false) {
        let detail = object
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return AgentResponse {
            output: format!("Claude Code error: {detail}"),
            success: false,
            session_id,
            raw_output_path: None,
            error_detail: Some(detail),
        };
    }

    let Some(structured) = object.get("structured_output") else {
        let detail = "missing 'structured_output' in envelope".to_string();
        error!(detail = %detail, keys = ?object.keys().collect::<Vec<_>>(), "incomplete envelope");
        return AgentResponse {
            output: format!("Claude Code error: {detail}"),
            success: false,
            session_id,
            raw_output_path: None,
            error_detail: Some(detail),
        };
    };

    let output = match structured {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    AgentResponse {
        output,
        success: true,
        session_id,
        raw_output_path: None,
        error_detail: None,
    }
}

/// Verify the CLI is installed; returns an error message when it is not.
async fn check_installed() -> Option<String> {
    let path = config::claude_path();
    match Command::new(&path)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await
    {
        Ok(output) if output.status.success() => None,
        Ok(_) | Err(_) => Some(format!(
            "Claude Code CLI is not installed. Expected at: {path}"
        )),
    }
}

#[async_trait]
impl CodingAgent for ClaudeAgent {
    fn provider_name(&self) -> &'static str {
        "claude"
    }

    async fn execute(
        &self,
        request: &AgentRequest,
        _stream_handler: Option<&dyn StreamHandler>,
    ) -> AgentResponse {
        if let Some(error) = check_installed().await {
            return AgentResponse::failure(error);
        }

        save_prompt(request);

        let model = request.model.clone().unwrap_or_else(|| "opus".to_string());
        let mut cmd = Command::new(config::claude_path());
        cmd.arg("-p")
            .arg(&request.prompt)
            .arg("--model")
            .arg(&model)
            .arg("--output-format")
            .arg("json");
        if let Some(schema) = &request.json_schema {
            cmd.arg("--json-schema").arg(schema);
        }
        if request.dangerously_skip_permissions {
            cmd.arg("--dangerously-skip-permissions");
        }
        cmd.current_dir(config::app_root())
            .env_clear()
            .envs(filtered_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(
            adw_id = %request.adw_id,
            agent = %request.agent_name,
            model = %model,
            "spawning Claude Code"
        );

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "failed to execute Claude Code");
                return AgentResponse::failure(format!("error executing Claude Code: {e}"));
            }
        };

        parse_envelope(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
            output.status.code().unwrap_or(-1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_command_extraction() {
        assert_eq!(slash_command("/adw-feature-plan arg"), Some("/adw-feature-plan"));
        assert_eq!(slash_command("/implement"), Some("/implement"));
        assert_eq!(slash_command("plain prompt"), None);
        assert_eq!(slash_command("/ not-a-command"), None);
    }

    #[test]
    fn empty_stdout_fails_with_stderr_detail() {
        let response = parse_envelope("", "boom", 1);
        assert!(!response.success);
        assert_eq!(response.error_detail.as_deref(), Some("Claude Code error: boom"));
    }

    #[test]
    fn empty_stdout_without_stderr_reports_exit_code() {
        let response = parse_envelope("", "", 3);
        assert!(!response.success);
        assert!(response.output.contains("exited with code 3"));
    }

    #[test]
    fn non_json_stdout_fails() {
        let response = parse_envelope("garbage output", "", 0);
        assert!(!response.success);
        assert!(response.output.contains("invalid JSON"));
    }

    #[test]
    fn wrong_envelope_type_fails_but_keeps_session() {
        let response = parse_envelope(
            r#"{"type": "message", "session_id": "s-1"}"#,
            "",
            0,
        );
        assert!(!response.success);
        assert_eq!(response.session_id.as_deref(), Some("s-1"));
        assert!(response.output.contains("expected envelope type 'result'"));
    }

    #[test]
    fn is_error_envelope_fails_with_result_text() {
        let response = parse_envelope(
            r#"{"type": "result", "subtype": "error", "is_error": true, "result": "ran out of turns", "session_id": "s-2"}"#,
            "",
            0,
        );
        assert!(!response.success);
        assert_eq!(response.error_detail.as_deref(), Some("ran out of turns"));
    }

    #[test]
    fn missing_structured_output_fails() {
        let response = parse_envelope(
            r#"{"type": "result", "subtype": "success", "is_error": false, "session_id": "s-3"}"#,
            "",
            0,
        );
        assert!(!response.success);
        assert!(response.output.contains("structured_output"));
    }

    #[test]
    fn object_structured_output_is_restringified() {
        let response = parse_envelope(
            r#"{"type": "result", "subtype": "success", "is_error": false,
                "session_id": "s-4", "duration_ms": 1200,
                "structured_output": {"output": "classify", "type": "feature", "level": "simple"}}"#,
            "",
            0,
        );
        assert!(response.success);
        assert_eq!(response.session_id.as_deref(), Some("s-4"));
        let parsed: Value = serde_json::from_str(&response.output).unwrap();
        assert_eq!(parsed["type"], "feature");
    }

    #[test]
    fn string_structured_output_passes_through() {
        let response = parse_envelope(
            r#"{"type": "result", "is_error": false, "structured_output": "{\"output\":\"plan\"}"}"#,
            "",
            0,
        );
        assert!(response.success);
        assert_eq!(response.output, r#"{"output":"plan"}"#);
    }

    #[test]
    fn non_success_subtype_still_succeeds_when_not_error() {
        let response = parse_envelope(
            r#"{"type": "result", "subtype": "error_max_turns", "is_error": false,
                "structured_output": {"output": "partial"}}"#,
            "",
            0,
        );
        assert!(response.success);
    }
}
