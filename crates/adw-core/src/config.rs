//! Environment-driven configuration.
//!
//! Every recognised variable has one accessor here so the rest of the tree
//! never reads the process environment directly. Parsing is split into pure
//! helpers that take the raw value, keeping the fallback rules testable.

use crate::types::Platform;
use std::env;
use std::path::PathBuf;
use tracing::warn;

pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_KEY: &str = "SUPABASE_SERVICE_ROLE_KEY";
pub const ENV_PLATFORM: &str = "DEV_SEC_OPS_PLATFORM";
pub const ENV_GITHUB_PAT: &str = "GITHUB_PAT";
pub const ENV_GITLAB_PAT: &str = "GITLAB_PAT";
pub const ENV_IMPLEMENT_PROVIDER: &str = "IMPLEMENT_PROVIDER";
pub const ENV_AGENT_PROVIDER: &str = "AGENT_PROVIDER";
pub const ENV_DEFAULT_GIT_BRANCH: &str = "DEFAULT_GIT_BRANCH";
pub const ENV_ALLOW_DESTRUCTIVE_GIT_OPS: &str = "ALLOW_DESTRUCTIVE_GIT_OPS";
pub const ENV_WORKFLOW_TIMEOUT: &str = "WORKFLOW_TIMEOUT_SECONDS";
pub const ENV_CODERABBIT_TIMEOUT: &str = "CODERABBIT_TIMEOUT_SECONDS";
pub const ENV_CLAUDE_PATH: &str = "CLAUDE_CODE_PATH";
pub const ENV_OPENCODE_PATH: &str = "OPENCODE_PATH";
pub const ENV_ADW_COMMAND: &str = "ADW_COMMAND";
pub const ENV_DATA_DIR: &str = "DATA_DIR";
pub const ENV_APP_ROOT: &str = "APP_ROOT";
pub const ENV_REGISTRY_FLAG: &str = "WORKFLOW_REGISTRY_FLAG";

/// Default reviewer CLI timeout in seconds.
pub const DEFAULT_CODERABBIT_TIMEOUT_SECS: u64 = 600;
/// Default provider when no selector is set.
pub const DEFAULT_PROVIDER: &str = "claude";

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Repository / application root: `APP_ROOT` or the current directory.
pub fn app_root() -> PathBuf {
    env_value(ENV_APP_ROOT)
        .map(PathBuf::from)
        .unwrap_or_else(|| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Data root for artifacts and agent logs: `DATA_DIR` or `<app_root>/.adw`.
pub fn data_dir() -> PathBuf {
    env_value(ENV_DATA_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|| app_root().join(".adw"))
}

/// PR platform selector; unset or unknown means no PR step.
pub fn platform() -> Option<Platform> {
    Platform::from_env_value(env_value(ENV_PLATFORM).as_deref())
}

/// Base branch for git setup.
pub fn default_git_branch() -> String {
    env_value(ENV_DEFAULT_GIT_BRANCH).unwrap_or_else(|| "main".to_string())
}

/// Whether `git reset --hard origin/<base>` is permitted during setup.
pub fn allow_destructive_git_ops() -> bool {
    env_value(ENV_ALLOW_DESTRUCTIVE_GIT_OPS)
        .as_deref()
        .map(parse_bool)
        .unwrap_or(false)
}

/// Whether the driver resolves pipelines through the workflow registry.
pub fn registry_flag_enabled() -> bool {
    env_value(ENV_REGISTRY_FLAG)
        .as_deref()
        .map(parse_bool)
        .unwrap_or(false)
}

/// Reviewer CLI timeout, `CODERABBIT_TIMEOUT_SECONDS` with safe fallback.
pub fn coderabbit_timeout_secs() -> u64 {
    parse_timeout_secs(
        env_value(ENV_CODERABBIT_TIMEOUT).as_deref(),
        ENV_CODERABBIT_TIMEOUT,
        DEFAULT_CODERABBIT_TIMEOUT_SECS,
    )
}

/// Worker-enforced workflow timeout, `WORKFLOW_TIMEOUT_SECONDS` over a
/// caller-provided default.
pub fn workflow_timeout_secs(default: u64) -> u64 {
    parse_timeout_secs(
        env_value(ENV_WORKFLOW_TIMEOUT).as_deref(),
        ENV_WORKFLOW_TIMEOUT,
        default,
    )
}

/// Claude CLI executable path.
pub fn claude_path() -> String {
    env_value(ENV_CLAUDE_PATH).unwrap_or_else(|| "claude".to_string())
}

/// OpenCode CLI executable path.
pub fn opencode_path() -> String {
    env_value(ENV_OPENCODE_PATH).unwrap_or_else(|| "opencode".to_string())
}

/// Pipeline driver override: a full argv, whitespace-separated.
pub fn adw_command() -> Option<Vec<String>> {
    env_value(ENV_ADW_COMMAND)
        .map(|v| v.split_whitespace().map(str::to_string).collect::<Vec<_>>())
        .filter(|argv| !argv.is_empty())
}

pub fn github_pat() -> Option<String> {
    env_value(ENV_GITHUB_PAT)
}

pub fn gitlab_pat() -> Option<String> {
    env_value(ENV_GITLAB_PAT)
}

/// Provider for the implement step: `IMPLEMENT_PROVIDER`, then
/// `AGENT_PROVIDER`, then `"claude"`.
pub fn implement_provider() -> String {
    resolve_provider(
        env_value(ENV_IMPLEMENT_PROVIDER).as_deref(),
        env_value(ENV_AGENT_PROVIDER).as_deref(),
    )
}

/// Pure resolution of the provider chain.
pub fn resolve_provider(step_specific: Option<&str>, global: Option<&str>) -> String {
    step_specific
        .or(global)
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_PROVIDER.to_string())
}

/// Boolean parsing shared by all flag-style variables.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "y" | "on"
    )
}

/// Parse a positive seconds value; invalid or non-positive values fall back
/// to the default with a warning.
pub fn parse_timeout_secs(value: Option<&str>, key: &str, default: u64) -> u64 {
    match value {
        None => default,
        Some(raw) => match raw.parse::<i64>() {
            Ok(v) if v > 0 => v as u64,
            Ok(v) => {
                warn!(key, value = v, default, "non-positive timeout, using default");
                default
            }
            Err(_) => {
                warn!(key, value = raw, default, "invalid timeout value, using default");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_variants() {
        for v in ["true", "1", "yes", "Y", "on", "TRUE"] {
            assert!(parse_bool(v), "expected truthy: {v}");
        }
        for v in ["false", "0", "no", "off", "maybe", ""] {
            assert!(!parse_bool(v), "expected falsy: {v}");
        }
    }

    #[test]
    fn parse_timeout_uses_default_on_garbage() {
        assert_eq!(parse_timeout_secs(None, "T", 600), 600);
        assert_eq!(parse_timeout_secs(Some("abc"), "T", 600), 600);
        assert_eq!(parse_timeout_secs(Some("0"), "T", 600), 600);
        assert_eq!(parse_timeout_secs(Some("-5"), "T", 600), 600);
        assert_eq!(parse_timeout_secs(Some("1200"), "T", 600), 1200);
    }

    #[test]
    fn provider_chain_falls_back_to_claude() {
        assert_eq!(resolve_provider(None, None), "claude");
        assert_eq!(resolve_provider(None, Some("opencode")), "opencode");
        assert_eq!(resolve_provider(Some("OpenCode"), Some("claude")), "opencode");
        assert_eq!(resolve_provider(Some("  "), None), "claude");
    }
}
