//! Worker main loop: claim issues, spawn pipeline runs, reconcile status.
//!
//! Coordination between worker instances happens entirely in the issue
//! store: the claim RPC locks rows with `FOR UPDATE SKIP LOCKED`, so each
//! queued issue lands on exactly one worker. An empty claim is the natural
//! backpressure signal and the loop sleeps the poll interval.

use crate::config::WorkerConfig;
use adw_core::{config, AdwId, ClaimedIssue, IssueStatus, IssueStore, IssueType, WorkflowKind};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Resolve the pipeline driver invocation.
///
/// `ADW_COMMAND` overrides the whole argv (it must accept the same trailing
/// arguments); the default is the bundled `adwctl` binary on PATH with its
/// `run` subcommand.
pub fn resolve_driver_command(env_override: Option<Vec<String>>) -> Vec<String> {
    env_override.unwrap_or_else(|| vec!["adwctl".to_string(), "run".to_string()])
}

/// Trailing driver arguments for one workflow run.
pub fn build_workflow_args(adw_id: &AdwId, kind: WorkflowKind, issue_id: i64) -> Vec<String> {
    vec![
        "--adw-id".to_string(),
        adw_id.to_string(),
        "--workflow-type".to_string(),
        kind.as_str().to_string(),
        issue_id.to_string(),
    ]
}

/// Route a claimed issue to its workflow kind.
pub fn workflow_kind_for(issue_type: IssueType) -> WorkflowKind {
    match issue_type {
        IssueType::Main => WorkflowKind::Main,
        IssueType::Patch => WorkflowKind::Patch,
    }
}

/// Long-running poll worker. One instance per worker id.
#[derive(Debug)]
pub struct Worker {
    config: WorkerConfig,
    store: IssueStore,
    driver_command: Vec<String>,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(config: WorkerConfig, store: IssueStore) -> Self {
        let driver_command = resolve_driver_command(config::adw_command());
        Self::with_driver_command(config, store, driver_command)
    }

    /// Construct with an explicit driver invocation (tests and operators
    /// that bypass `ADW_COMMAND`).
    pub fn with_driver_command(
        config: WorkerConfig,
        store: IssueStore,
        driver_command: Vec<String>,
    ) -> Self {
        Self {
            config,
            store,
            driver_command,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token the signal handler cancels to request a graceful stop.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Main loop: claim, execute, repeat until shutdown.
    ///
    /// Shutdown lets an in-flight workflow finish; only the per-workflow
    /// timeout terminates a running pipeline subprocess.
    pub async fn run(&self) {
        info!(
            worker_id = %self.config.worker_id,
            poll_interval = self.config.poll_interval_secs,
            workflow_timeout = self.config.workflow_timeout_secs,
            "worker starting main loop"
        );

        while !self.shutdown.is_cancelled() {
            match self.store.claim_next_issue(&self.config.worker_id).await {
                Ok(Some(issue)) => {
                    info!(
                        issue_id = issue.issue_id,
                        status = issue.issue_status.as_str(),
                        issue_type = issue.issue_type.as_str(),
                        "locked issue for processing"
                    );
                    self.execute_workflow(&issue).await;
                }
                Ok(None) => {
                    debug!(
                        poll_interval = self.config.poll_interval_secs,
                        "no pending issues, sleeping"
                    );
                    self.sleep_poll_interval().await;
                }
                Err(e) => {
                    error!(error = %e, "error retrieving next issue");
                    self.sleep_poll_interval().await;
                }
            }
        }

        info!(worker_id = %self.config.worker_id, "worker stopped");
    }

    async fn sleep_poll_interval(&self) {
        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)) => {}
            () = self.shutdown.cancelled() => {}
        }
    }

    /// Spawn the pipeline driver for a claimed issue and reconcile the
    /// terminal status: exit 0 completes the issue, anything else (including
    /// timeout) requeues it to pending for another worker.
    pub async fn execute_workflow(&self, issue: &ClaimedIssue) -> bool {
        let adw_id = AdwId::generate();
        let kind = workflow_kind_for(issue.issue_type);

        let mut argv = self.driver_command.clone();
        argv.extend(build_workflow_args(&adw_id, kind, issue.issue_id));
        info!(
            issue_id = issue.issue_id,
            adw_id = %adw_id,
            command = %argv.join(" "),
            "executing workflow"
        );

        let program = argv.remove(0);
        let mut child = match Command::new(&program)
            .args(&argv)
            .current_dir(config::app_root())
            // Inherited stdio keeps the driver's logs flowing in real time.
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!(error = %e, program = %program, "failed to spawn pipeline driver");
                self.update_status(issue.issue_id, IssueStatus::Pending).await;
                return false;
            }
        };

        let timeout = Duration::from_secs(self.config.workflow_timeout_secs);
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                info!(
                    issue_id = issue.issue_id,
                    adw_id = %adw_id,
                    "successfully completed issue"
                );
                self.update_status(issue.issue_id, IssueStatus::Completed).await;
                true
            }
            Ok(Ok(status)) => {
                error!(
                    issue_id = issue.issue_id,
                    adw_id = %adw_id,
                    exit_code = status.code().unwrap_or(-1),
                    "workflow failed, requeueing issue"
                );
                self.update_status(issue.issue_id, IssueStatus::Pending).await;
                false
            }
            Ok(Err(e)) => {
                error!(issue_id = issue.issue_id, error = %e, "error waiting for workflow");
                self.update_status(issue.issue_id, IssueStatus::Pending).await;
                false
            }
            Err(_) => {
                error!(
                    issue_id = issue.issue_id,
                    adw_id = %adw_id,
                    timeout_secs = self.config.workflow_timeout_secs,
                    "workflow timed out, requeueing issue"
                );
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill timed-out workflow");
                }
                self.update_status(issue.issue_id, IssueStatus::Pending).await;
                false
            }
        }
    }

    /// Status updates are last-writer-wins and never fatal to the loop.
    async fn update_status(&self, issue_id: i64, status: IssueStatus) {
        if let Err(e) = self.store.update_issue_status(issue_id, status).await {
            error!(
                issue_id,
                status = status.as_str(),
                error = %e,
                "error updating issue status"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_worker(driver: Vec<&str>, timeout_secs: i64) -> Worker {
        let config =
            WorkerConfig::new("local-1", 10, timeout_secs, "INFO", None).unwrap();
        // Unroutable store: status updates fail and are swallowed, which is
        // exactly the transient-store contract.
        let store = IssueStore::new("http://127.0.0.1:9", "test-key").unwrap();
        Worker::with_driver_command(
            config,
            store,
            driver.into_iter().map(str::to_string).collect(),
        )
    }

    fn claimed(issue_id: i64, issue_type: IssueType) -> ClaimedIssue {
        ClaimedIssue {
            issue_id,
            issue_description: "Add dark mode toggle".to_string(),
            issue_status: adw_core::IssueStatus::Started,
            issue_type,
        }
    }

    #[tokio::test]
    async fn zero_exit_reports_success() {
        let worker = test_worker(vec!["true"], 30);
        assert!(worker.execute_workflow(&claimed(1, IssueType::Main)).await);
    }

    #[tokio::test]
    async fn nonzero_exit_reports_failure_for_requeue() {
        let worker = test_worker(vec!["false"], 30);
        assert!(!worker.execute_workflow(&claimed(2, IssueType::Main)).await);
    }

    #[tokio::test]
    async fn missing_driver_binary_reports_failure() {
        let worker = test_worker(vec!["definitely-not-a-driver-binary"], 30);
        assert!(!worker.execute_workflow(&claimed(3, IssueType::Main)).await);
    }

    #[tokio::test]
    async fn workflow_timeout_kills_the_driver() {
        let worker = test_worker(vec!["sh", "-c", "sleep 30"], 1);
        let start = std::time::Instant::now();
        assert!(!worker.execute_workflow(&claimed(4, IssueType::Patch)).await);
        assert!(start.elapsed() < Duration::from_secs(10), "driver was not killed promptly");
    }

    #[tokio::test]
    async fn shutdown_token_stops_the_loop() {
        let worker = test_worker(vec!["true"], 30);
        worker.shutdown_token().cancel();
        // With the token already cancelled the loop exits without polling.
        worker.run().await;
    }

    #[test]
    fn default_driver_command_is_adwctl_run() {
        assert_eq!(
            resolve_driver_command(None),
            vec!["adwctl".to_string(), "run".to_string()]
        );
    }

    #[test]
    fn env_override_replaces_driver_command() {
        let argv = resolve_driver_command(Some(vec![
            "uv".to_string(),
            "run".to_string(),
            "pipeline".to_string(),
        ]));
        assert_eq!(argv, vec!["uv", "run", "pipeline"]);
    }

    #[test]
    fn patch_issue_routes_to_patch_workflow() {
        let adw_id = AdwId::from_string("adw-w1");
        let args = build_workflow_args(&adw_id, workflow_kind_for(IssueType::Patch), 7);
        assert!(args.windows(2).any(|w| w == ["--workflow-type", "patch"]));
        assert_eq!(args.last().map(String::as_str), Some("7"));
    }

    #[test]
    fn main_issue_routes_to_main_workflow() {
        let adw_id = AdwId::from_string("adw-w1");
        let args = build_workflow_args(&adw_id, workflow_kind_for(IssueType::Main), 1);
        assert_eq!(
            args,
            vec!["--adw-id", "adw-w1", "--workflow-type", "main", "1"]
        );
    }
}
