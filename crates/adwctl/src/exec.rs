//! Subprocess execution for external tools (git, gh, glab, coderabbit).
//!
//! Agent CLIs have their own drivers in [`crate::agents`]; this helper
//! covers the short-lived tool calls steps make, with per-call timeouts and
//! a distinct not-found error so callers can map an absent binary to a skip
//! rather than a failure.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0} not found on PATH")]
    NotFound(String),
    #[error("{program} timed out after {secs} seconds")]
    TimedOut { program: String, secs: u64 },
    #[error("io error running {program}: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ToolError>;

/// Captured output of a finished tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a tool to completion, inheriting the parent environment plus
/// `extra_env`, optionally bounded by a timeout.
pub async fn run_tool(
    program: &str,
    args: &[&str],
    cwd: &Path,
    extra_env: &HashMap<String, String>,
    timeout: Option<Duration>,
) -> Result<ToolOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .envs(extra_env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(program, ?args, cwd = %cwd.display(), "running tool");

    let future = cmd.output();
    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, future).await {
            Ok(result) => result,
            Err(_) => {
                return Err(ToolError::TimedOut {
                    program: program.to_string(),
                    secs: limit.as_secs(),
                });
            }
        },
        None => future.await,
    };

    let output = output.map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ToolError::NotFound(program.to_string())
        } else {
            ToolError::Io {
                program: program.to_string(),
                source,
            }
        }
    })?;

    Ok(ToolOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run `git` in the repository with no extra environment.
pub async fn run_git(repo: &Path, args: &[&str], timeout: Option<Duration>) -> Result<ToolOutput> {
    run_tool("git", args, repo, &HashMap::new(), timeout).await
}
