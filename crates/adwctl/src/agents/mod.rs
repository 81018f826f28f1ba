//! Provider-agnostic execution of external coding-agent CLIs.
//!
//! Two providers implement the same interface: `claude` runs synchronously
//! and returns a single JSON envelope on stdout; `opencode` streams
//! line-delimited JSON. Provider selection for the implement step is driven
//! by `IMPLEMENT_PROVIDER` / `AGENT_PROVIDER`, defaulting to `claude`; every
//! other agent-backed step uses the envelope provider.

pub mod claude;
pub mod opencode;

use adw_core::AdwId;
use async_trait::async_trait;
use std::path::PathBuf;

/// Provider-agnostic execution request.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Full prompt text; slash-command prompts (`/adw-...`) are mirrored to
    /// the per-workflow prompt log by the envelope provider.
    pub prompt: String,
    pub issue_id: Option<i64>,
    pub adw_id: AdwId,
    /// Agent role name, used for the log directory layout.
    pub agent_name: String,
    pub model: Option<String>,
    /// Override for the raw-output capture path (streaming provider).
    pub output_path: Option<PathBuf>,
    /// JSON schema forwarded to the envelope provider's `--json-schema`.
    pub json_schema: Option<String>,
    pub dangerously_skip_permissions: bool,
}

impl AgentRequest {
    pub fn new(prompt: impl Into<String>, adw_id: AdwId, agent_name: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            issue_id: None,
            adw_id,
            agent_name: agent_name.into(),
            model: None,
            output_path: None,
            json_schema: None,
            dangerously_skip_permissions: true,
        }
    }

    pub fn with_issue(mut self, issue_id: Option<i64>) -> Self {
        self.issue_id = issue_id;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.json_schema = Some(schema.into());
        self
    }
}

/// Provider-agnostic execution response.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    /// Structured output text on success; diagnostic text on failure.
    pub output: String,
    pub success: bool,
    pub session_id: Option<String>,
    pub raw_output_path: Option<PathBuf>,
    pub error_detail: Option<String>,
}

impl AgentResponse {
    pub fn failure(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            output: detail.clone(),
            success: false,
            session_id: None,
            raw_output_path: None,
            error_detail: Some(detail),
        }
    }
}

/// Callback for streamed agent output lines.
///
/// Handlers map stream events into progress comments and must swallow their
/// own errors; a failing handler never aborts the agent run.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn on_line(&self, line: &str);
}

/// Uniform interface over external coding-agent CLIs.
#[async_trait]
pub trait CodingAgent: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn execute(
        &self,
        request: &AgentRequest,
        stream_handler: Option<&dyn StreamHandler>,
    ) -> AgentResponse;
}

/// Resolve a provider by name; unknown names fall back to claude.
pub fn get_agent(provider: &str) -> Box<dyn CodingAgent> {
    match provider {
        "opencode" => Box::new(opencode::OpenCodeAgent),
        _ => Box::new(claude::ClaudeAgent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_falls_back_to_claude() {
        assert_eq!(get_agent("claude").provider_name(), "claude");
        assert_eq!(get_agent("opencode").provider_name(), "opencode");
        assert_eq!(get_agent("mystery").provider_name(), "claude");
    }
}
