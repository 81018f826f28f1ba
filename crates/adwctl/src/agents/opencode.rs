//! Streaming provider: the OpenCode CLI.
//!
//! Stdout is line-delimited JSON. Lines are appended to a `raw_output.jsonl`
//! capture and forwarded through a bounded channel to the stream handler
//! while stderr is drained concurrently; both readers are joined after the
//! process exits. The capture is then re-emitted as a `.json` array for
//! operator inspection and mined for the final result message.

use super::{AgentRequest, AgentResponse, CodingAgent, StreamHandler};
use adw_core::{config, paths};
use async_trait::async_trait;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

#[derive(Debug)]
pub struct OpenCodeAgent;

/// Default model when the request does not name one.
const DEFAULT_MODEL: &str = "zai-coding-plan/glm-4.6";

/// Bound on the stdout line channel; the reader blocks rather than buffering
/// unbounded output when the handler falls behind.
const STREAM_CHANNEL_CAPACITY: usize = 256;

/// The version probe must answer quickly; a hang here is a hard failure.
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Parse a JSONL capture into its parseable messages and the result message.
///
/// Malformed lines are skipped with a warning. The result message is the
/// last line whose `type` is `"result"`.
pub fn parse_jsonl(content: &str) -> (Vec<Value>, Option<Value>) {
    let mut messages = Vec::new();
    for line in content.lines() {
        let stripped = line.trim();
        if stripped.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(stripped) {
            Ok(value) => messages.push(value),
            Err(e) => warn!(error = %e, "skipping malformed JSON line"),
        }
    }
    let result = messages
        .iter()
        .rev()
        .find(|m| m.get("type").and_then(Value::as_str) == Some("result"))
        .cloned();
    (messages, result)
}

/// Pick the message to treat as the run result.
///
/// Preference order: explicit `type == "result"`, then the last message
/// carrying a `session_id`, then nothing.
pub fn select_result_message(messages: &[Value], explicit: Option<Value>) -> Option<Value> {
    explicit.or_else(|| {
        messages
            .iter()
            .rev()
            .find(|m| m.get("session_id").is_some())
            .cloned()
    })
}

/// Re-emit a `.jsonl` capture as a parallel `.json` array file.
pub fn convert_jsonl_to_json(jsonl_path: &Path) -> std::io::Result<PathBuf> {
    let json_path = jsonl_path.with_extension("json");
    let content = std::fs::read_to_string(jsonl_path)?;
    let (messages, _) = parse_jsonl(&content);
    std::fs::write(&json_path, serde_json::to_string_pretty(&messages)?)?;
    debug!(path = %json_path.display(), "created JSON array capture");
    Ok(json_path)
}

/// Verify the CLI answers a version probe within the hard timeout.
async fn check_installed() -> Option<String> {
    let path = config::opencode_path();
    let probe = Command::new(&path)
        .arg("--version")
        .stdin(Stdio::null())
        .output();
    match tokio::time::timeout(VERSION_CHECK_TIMEOUT, probe).await {
        Ok(Ok(output)) if output.status.success() => None,
        Ok(_) => Some(format!("OpenCode CLI is not installed. Expected at: {path}")),
        Err(_) => Some(format!(
            "OpenCode CLI version check timed out. Check installation at: {path}"
        )),
    }
}

#[async_trait]
impl CodingAgent for OpenCodeAgent {
    fn provider_name(&self) -> &'static str {
        "opencode"
    }

    async fn execute(
        &self,
        request: &AgentRequest,
        stream_handler: Option<&dyn StreamHandler>,
    ) -> AgentResponse {
        if let Some(error) = check_installed().await {
            return AgentResponse::failure(error);
        }

        let output_path = request.output_path.clone().unwrap_or_else(|| {
            paths::raw_output_path(&config::data_dir(), &request.adw_id, &request.agent_name)
        });
        if let Some(parent) = output_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return AgentResponse::failure(format!(
                    "failed to create agent log directory: {e}"
                ));
            }
        }
        let capture = match std::fs::File::create(&output_path) {
            Ok(file) => file,
            Err(e) => {
                return AgentResponse::failure(format!("failed to create output capture: {e}"));
            }
        };

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let mut cmd = Command::new(config::opencode_path());
        cmd.arg("run")
            .arg("--model")
            .arg(&model)
            .arg("--command")
            .arg("implement")
            .arg("--format")
            .arg("json")
            .arg(&request.prompt)
            .current_dir(config::app_root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(
            adw_id = %request.adw_id,
            agent = %request.agent_name,
            model = %model,
            capture = %output_path.display(),
            "spawning OpenCode"
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(error = %e, "failed to execute OpenCode");
                return AgentResponse::failure(format!("error executing OpenCode: {e}"));
            }
        };

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let (tx, mut rx) = mpsc::channel::<String>(STREAM_CHANNEL_CAPACITY);

        // Stdout reader: append to the capture file, forward each line into
        // the bounded channel. Dropping the sender at EOF closes the channel.
        let stdout_task = tokio::spawn(async move {
            let mut capture = capture;
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Err(e) = writeln!(capture, "{line}") {
                    warn!(error = %e, "failed to append to output capture");
                }
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            let _ = capture.flush();
        });

        // Stderr reader: drain for error reporting.
        let stderr_task = tokio::spawn(async move {
            let mut collected = Vec::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push(line);
            }
            collected
        });

        // Forward streamed lines to the handler. Handler errors are the
        // handler's problem; the loop only ends when the channel closes.
        while let Some(line) = rx.recv().await {
            if let Some(handler) = stream_handler {
                handler.on_line(&line).await;
            }
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                return AgentResponse::failure(format!("error waiting for OpenCode: {e}"));
            }
        };
        let _ = stdout_task.await;
        let stderr_lines = stderr_task.await.unwrap_or_default();
        let returncode = status.code().unwrap_or(0);

        let content = std::fs::read_to_string(&output_path).unwrap_or_default();
        let (messages, explicit_result) = parse_jsonl(&content);
        if let Err(e) = convert_jsonl_to_json(&output_path) {
            warn!(error = %e, "failed to convert capture to JSON array");
        }
        let result_message = select_result_message(&messages, explicit_result);

        if returncode == 0 {
            if let Some(result) = &result_message {
                let session_id = result
                    .get("session_id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let is_error = result
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let result_text = result
                    .get("result")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                return AgentResponse {
                    output: result_text.clone(),
                    success: !is_error,
                    session_id,
                    raw_output_path: Some(output_path),
                    error_detail: is_error.then_some(result_text),
                };
            }
            if let Some(last) = messages.last() {
                return AgentResponse {
                    output: last.to_string(),
                    success: true,
                    session_id: None,
                    raw_output_path: Some(output_path),
                    error_detail: None,
                };
            }
            return AgentResponse {
                output: content,
                success: true,
                session_id: None,
                raw_output_path: Some(output_path),
                error_detail: None,
            };
        }

        // Non-zero exit: surface the most specific diagnostic available.
        let mut error_detail = stderr_lines.join("\n").trim().to_string();
        let mut session_id = None;
        if let Some(result) = &result_message {
            session_id = result
                .get("session_id")
                .and_then(Value::as_str)
                .map(str::to_string);
            let result_text = result
                .get("result")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            if !result_text.is_empty() {
                error_detail = result_text;
            }
        } else if let Some(last) = messages.last() {
            error_detail = last
                .get("result")
                .or_else(|| last.get("error"))
                .and_then(Value::as_str)
                .map_or_else(|| last.to_string(), str::to_string);
        } else if error_detail.is_empty() && !content.trim().is_empty() {
            error_detail = content.trim().to_string();
        }
        if error_detail.is_empty() {
            error_detail = format!("process exited with code {returncode}");
        }

        AgentResponse {
            output: format!("OpenCode error: {error_detail}"),
            success: false,
            session_id,
            raw_output_path: Some(output_path),
            error_detail: Some(error_detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_jsonl_skips_malformed_lines() {
        let content = r#"{"type": "text", "part": {"text": "hi"}}
not json at all
{"type": "result", "session_id": "s-1", "is_error": false, "result": "done"}"#;
        let (messages, result) = parse_jsonl(content);
        assert_eq!(messages.len(), 2);
        assert_eq!(result.unwrap()["session_id"], "s-1");
    }

    #[test]
    fn result_message_prefers_explicit_result_type() {
        let content = r#"{"type": "text", "session_id": "early"}
{"type": "result", "session_id": "final", "result": "ok"}
{"type": "text", "part": {"text": "trailing"}}"#;
        let (messages, explicit) = parse_jsonl(content);
        let result = select_result_message(&messages, explicit).unwrap();
        assert_eq!(result["session_id"], "final");
    }

    #[test]
    fn result_falls_back_to_last_session_id_message() {
        let content = r#"{"type": "text", "part": {"text": "a"}}
{"type": "step", "session_id": "s-9"}
{"type": "text", "part": {"text": "b"}}"#;
        let (messages, explicit) = parse_jsonl(content);
        assert!(explicit.is_none());
        let result = select_result_message(&messages, explicit).unwrap();
        assert_eq!(result["session_id"], "s-9");
    }

    #[test]
    fn no_result_candidates_returns_none() {
        let (messages, explicit) = parse_jsonl(r#"{"type": "text"}"#);
        assert!(select_result_message(&messages, explicit).is_none());
    }

    #[test]
    fn convert_creates_parallel_json_array() {
        let dir = TempDir::new().unwrap();
        let jsonl = dir.path().join("raw_output.jsonl");
        std::fs::write(&jsonl, "{\"a\": 1}\nbroken\n{\"b\": 2}\n").unwrap();

        let json_path = convert_jsonl_to_json(&jsonl).unwrap();
        assert_eq!(json_path, dir.path().join("raw_output.json"));
        let array: Vec<Value> =
            serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array[0]["a"], 1);
    }
}
