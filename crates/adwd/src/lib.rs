//! adwd - ADW issue worker daemon.
//!
//! Polls the shared issue store for queued issues assigned to this worker,
//! spawns one pipeline subprocess per claimed issue, and reconciles the
//! terminal status.

pub mod config;
pub mod worker;

pub use config::{WorkerConfig, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_WORKFLOW_TIMEOUT_SECS};
pub use worker::Worker;

/// Type alias for application-level errors with context.
pub type AppResult<T> = eyre::Result<T>;
