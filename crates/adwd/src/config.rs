//! Worker daemon configuration and validation.

use adw_core::types::VALID_WORKER_IDS;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_WORKFLOW_TIMEOUT_SECS: u64 = 3600;

const VALID_LOG_LEVELS: [&str; 5] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker_id cannot be empty")]
    EmptyWorkerId,
    #[error("poll_interval must be positive")]
    NonPositivePollInterval,
    #[error("workflow_timeout must be positive")]
    NonPositiveWorkflowTimeout,
    #[error("log_level must be one of {VALID_LOG_LEVELS:?}, got '{0}'")]
    InvalidLogLevel(String),
}

/// Validated settings for one worker instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique identifier this worker claims issues under.
    pub worker_id: String,
    pub poll_interval_secs: u64,
    pub workflow_timeout_secs: u64,
    /// Normalised to uppercase.
    pub log_level: String,
    pub working_dir: Option<PathBuf>,
}

impl WorkerConfig {
    pub fn new(
        worker_id: impl Into<String>,
        poll_interval_secs: i64,
        workflow_timeout_secs: i64,
        log_level: impl Into<String>,
        working_dir: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let worker_id = worker_id.into().trim().to_string();
        if worker_id.is_empty() {
            return Err(ConfigError::EmptyWorkerId);
        }
        if !VALID_WORKER_IDS.contains(&worker_id.as_str()) {
            // The store-side RPC filters by assignment, so an unknown id
            // simply never receives work. Worth flagging early.
            warn!(worker_id = %worker_id, "worker id is not in the known worker set");
        }
        if poll_interval_secs <= 0 {
            return Err(ConfigError::NonPositivePollInterval);
        }
        if workflow_timeout_secs <= 0 {
            return Err(ConfigError::NonPositiveWorkflowTimeout);
        }
        let log_level = log_level.into().trim().to_uppercase();
        if !VALID_LOG_LEVELS.contains(&log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(log_level));
        }

        Ok(Self {
            worker_id,
            poll_interval_secs: poll_interval_secs as u64,
            workflow_timeout_secs: workflow_timeout_secs as u64,
            log_level,
            working_dir,
        })
    }

    /// Map the worker log level onto a tracing filter directive.
    pub fn tracing_directive(&self) -> &'static str {
        match self.log_level.as_str() {
            "DEBUG" => "debug",
            "WARNING" => "warn",
            "ERROR" | "CRITICAL" => "error",
            _ => "info",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_config_passes() {
        let config = WorkerConfig::new("alleycat-1", 10, 3600, "info", None).unwrap();
        assert_eq!(config.worker_id, "alleycat-1");
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.log_level, "INFO");
    }

    #[test]
    fn empty_worker_id_is_rejected() {
        assert_eq!(
            WorkerConfig::new("  ", 10, 3600, "INFO", None).unwrap_err(),
            ConfigError::EmptyWorkerId
        );
    }

    #[test]
    fn non_positive_poll_interval_is_rejected() {
        assert_eq!(
            WorkerConfig::new("local-1", 0, 3600, "INFO", None).unwrap_err(),
            ConfigError::NonPositivePollInterval
        );
        assert_eq!(
            WorkerConfig::new("local-1", -3, 3600, "INFO", None).unwrap_err(),
            ConfigError::NonPositivePollInterval
        );
    }

    #[test]
    fn non_positive_timeout_is_rejected() {
        assert_eq!(
            WorkerConfig::new("local-1", 10, 0, "INFO", None).unwrap_err(),
            ConfigError::NonPositiveWorkflowTimeout
        );
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        assert!(matches!(
            WorkerConfig::new("local-1", 10, 3600, "VERBOSE", None).unwrap_err(),
            ConfigError::InvalidLogLevel(_)
        ));
    }

    #[test]
    fn log_levels_map_to_tracing_directives() {
        let config = |level: &str| WorkerConfig::new("local-1", 10, 3600, level, None).unwrap();
        assert_eq!(config("DEBUG").tracing_directive(), "debug");
        assert_eq!(config("INFO").tracing_directive(), "info");
        assert_eq!(config("WARNING").tracing_directive(), "warn");
        assert_eq!(config("CRITICAL").tracing_directive(), "error");
    }
}
