//! Pipeline runner: sequential step execution with criticality semantics
//! and bounded iterative re-entry.

use crate::notify::Notifier;
use crate::steps::{WorkflowContext, WorkflowStep};
use adw_core::{config, paths, AdwId, ArtifactError, ArtifactStore, IssueStore};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Per-step budget for `rerun_from` re-entry. Exhausting it demotes the
/// rerun to a plain result and execution continues forward.
pub const MAX_RERUN_ITERATIONS: u32 = 5;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("step not found: {0}")]
    StepNotFound(String),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

pub type Result<T> = std::result::Result<T, RunnerError>;

/// Executes an ordered step list against a workflow context.
///
/// The runner never touches agent subprocesses itself; steps own their
/// external calls and report back through `StepResult`.
pub struct PipelineRunner {
    steps: Vec<Box<dyn WorkflowStep>>,
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl PipelineRunner {
    pub fn new(steps: Vec<Box<dyn WorkflowStep>>) -> Self {
        Self { steps }
    }

    /// Open the artifact store and assemble the per-run context.
    ///
    /// Patch runs thread their parent workflow id here; the open fails when
    /// the parent's artifact directory does not exist.
    pub fn create_context(
        issue_id: Option<i64>,
        adw_id: AdwId,
        parent_workflow_id: Option<AdwId>,
        issue_store: Option<Arc<IssueStore>>,
        notifier: Arc<Notifier>,
    ) -> Result<WorkflowContext> {
        let base = paths::workflows_dir(&config::data_dir());
        Self::create_context_in(
            &base,
            issue_id,
            adw_id,
            parent_workflow_id,
            issue_store,
            notifier,
        )
    }

    /// Context creation against an explicit workflows directory.
    pub fn create_context_in(
        base: &std::path::Path,
        issue_id: Option<i64>,
        adw_id: AdwId,
        parent_workflow_id: Option<AdwId>,
        issue_store: Option<Arc<IssueStore>>,
        notifier: Arc<Notifier>,
    ) -> Result<WorkflowContext> {
        let store = ArtifactStore::open(base, adw_id.clone(), parent_workflow_id)?;
        Ok(WorkflowContext::new(
            issue_id, adw_id, store, issue_store, notifier,
        ))
    }

    fn position_of(&self, step_name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name() == step_name)
    }

    /// Execute the full pipeline.
    ///
    /// Returns `false` when a critical step fails; best-effort failures log
    /// and continue. A successful step may name an earlier step through
    /// `rerun_from`, jumping backward subject to the per-step budget.
    pub async fn run(&self, context: &mut WorkflowContext) -> bool {
        info!(adw_id = %context.adw_id, issue_id = ?context.issue_id, "starting workflow run");

        let mut index = 0;
        while index < self.steps.len() {
            let step = &self.steps[index];
            info!(step = step.name(), issue_id = ?context.issue_id, "step start");

            let result = step.run(context).await;

            info!(
                step = step.name(),
                success = result.success,
                issue_id = ?context.issue_id,
                "step end"
            );

            if let Some(target) = result.rerun_from.as_deref() {
                match self.position_of(target) {
                    Some(target_index) if target_index <= index => {
                        let counter = context
                            .data
                            .rerun_counts
                            .entry(step.name().to_string())
                            .or_insert(0);
                        *counter += 1;
                        if *counter >= MAX_RERUN_ITERATIONS {
                            warn!(
                                step = step.name(),
                                iterations = *counter,
                                "rerun budget exhausted, continuing forward"
                            );
                        } else {
                            info!(
                                from = step.name(),
                                to = target,
                                iteration = *counter,
                                "re-entering pipeline"
                            );
                            index = target_index;
                            continue;
                        }
                    }
                    Some(_) => {
                        warn!(
                            step = step.name(),
                            target, "rerun target is not an earlier step, ignoring"
                        );
                    }
                    None => {
                        warn!(step = step.name(), target, "rerun target not found, ignoring");
                    }
                }
            }

            if !result.success {
                if step.is_critical() {
                    let mut message = format!("Critical step '{}' failed", step.name());
                    if let Some(detail) = &result.error {
                        message.push_str(&format!(": {detail}"));
                    }
                    error!("{message}, aborting workflow");
                    return false;
                }
                let mut message = format!("Best-effort step '{}' failed", step.name());
                if let Some(detail) = &result.error {
                    message.push_str(&format!(": {detail}"));
                }
                warn!("{message}, continuing");
            }

            index += 1;
        }

        info!(adw_id = %context.adw_id, "workflow completed successfully");
        true
    }

    /// Execute a single step by name, resuming from persisted artifacts.
    ///
    /// Steps that declare dependencies require the workflow directory to
    /// hold at least one artifact; dependency-free steps run directly.
    pub async fn run_single_step(
        &self,
        step_name: &str,
        context: &mut WorkflowContext,
        has_dependencies: bool,
    ) -> Result<bool> {
        let index = self
            .position_of(step_name)
            .ok_or_else(|| RunnerError::StepNotFound(step_name.to_string()))?;
        let step = &self.steps[index];

        if has_dependencies && !context.store.has_any_artifacts() {
            error!(
                workflow_dir = %context.store.workflow_dir().display(),
                "workflow directory contains no artifacts; run the full \
                 workflow or prior steps before executing this step"
            );
            return Ok(false);
        }

        info!(step = step.name(), issue_id = ?context.issue_id, "step start");
        let result = step.run(context).await;
        info!(step = step.name(), success = result.success, "step end");

        if !result.success {
            let mut message = format!("Step '{step_name}' failed");
            if let Some(detail) = &result.error {
                message.push_str(&format!(": {detail}"));
            }
            error!("{message}");
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::{test_support, StepResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc as StdArc;
    use tempfile::TempDir;

    /// Scripted step for runner tests: counts executions and yields results
    /// from a callback.
    struct StubStep {
        name: &'static str,
        critical: bool,
        runs: StdArc<AtomicU32>,
        behavior: Box<dyn Fn(u32) -> StepResult + Send + Sync>,
    }

    impl StubStep {
        fn ok(name: &'static str) -> (Self, StdArc<AtomicU32>) {
            Self::with(name, true, |_| StepResult::ok())
        }

        fn with(
            name: &'static str,
            critical: bool,
            behavior: impl Fn(u32) -> StepResult + Send + Sync + 'static,
        ) -> (Self, StdArc<AtomicU32>) {
            let runs = StdArc::new(AtomicU32::new(0));
            (
                Self {
                    name,
                    critical,
                    runs: StdArc::clone(&runs),
                    behavior: Box::new(behavior),
                },
                runs,
            )
        }
    }

    #[async_trait]
    impl WorkflowStep for StubStep {
        fn name(&self) -> &str {
            self.name
        }

        fn is_critical(&self) -> bool {
            self.critical
        }

        async fn run(&self, _context: &mut WorkflowContext) -> StepResult {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            (self.behavior)(run)
        }
    }

    #[tokio::test]
    async fn all_steps_succeed_in_order() {
        let dir = TempDir::new().unwrap();
        let mut context = test_support::context(dir.path(), "adw-run", Some(1));

        let (a, a_runs) = StubStep::ok("step a");
        let (b, b_runs) = StubStep::ok("step b");
        let runner = PipelineRunner::new(vec![Box::new(a), Box::new(b)]);

        assert!(runner.run(&mut context).await);
        assert_eq!(a_runs.load(Ordering::SeqCst), 1);
        assert_eq!(b_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn critical_failure_aborts_run() {
        let dir = TempDir::new().unwrap();
        let mut context = test_support::context(dir.path(), "adw-run", Some(1));

        let (a, _) = StubStep::ok("step a");
        let (b, _) = StubStep::with("step b", true, |_| StepResult::fail("boom"));
        let (c, c_runs) = StubStep::ok("step c");
        let runner = PipelineRunner::new(vec![Box::new(a), Box::new(b), Box::new(c)]);

        assert!(!runner.run(&mut context).await);
        assert_eq!(c_runs.load(Ordering::SeqCst), 0, "later steps must not run");
    }

    #[tokio::test]
    async fn best_effort_failure_continues() {
        let dir = TempDir::new().unwrap();
        let mut context = test_support::context(dir.path(), "adw-run", Some(1));

        let (a, _) = StubStep::with("step a", false, |_| StepResult::fail("soft failure"));
        let (b, b_runs) = StubStep::ok("step b");
        let runner = PipelineRunner::new(vec![Box::new(a), Box::new(b)]);

        assert!(runner.run(&mut context).await);
        assert_eq!(b_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rerun_loop_is_bounded_by_iteration_budget() {
        let dir = TempDir::new().unwrap();
        let mut context = test_support::context(dir.path(), "adw-run", Some(1));

        // Mirrors the review/fix loop: "review" always succeeds, "fix"
        // always requests re-entry from review.
        let (review, review_runs) = StubStep::ok("review step");
        let (fix, fix_runs) = StubStep::with("fix step", false, |_| {
            StepResult::ok().with_rerun_from("review step")
        });
        let (done, done_runs) = StubStep::ok("final step");
        let runner = PipelineRunner::new(vec![Box::new(review), Box::new(fix), Box::new(done)]);

        assert!(runner.run(&mut context).await, "run completes despite the loop");
        assert_eq!(review_runs.load(Ordering::SeqCst), MAX_RERUN_ITERATIONS);
        assert_eq!(fix_runs.load(Ordering::SeqCst), MAX_RERUN_ITERATIONS);
        assert_eq!(done_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rerun_on_failed_critical_step_jumps_before_aborting() {
        let dir = TempDir::new().unwrap();
        let mut context = test_support::context(dir.path(), "adw-run", Some(1));

        // "implement" fails with rerun_from "plan" until plan has run twice.
        let (plan, plan_runs) = StubStep::ok("plan step");
        let plan_counter = StdArc::clone(&plan_runs);
        let (implement, implement_runs) = StubStep::with("implement step", true, move |_| {
            if plan_counter.load(Ordering::SeqCst) < 2 {
                StepResult::fail("plan not available").with_rerun_from("plan step")
            } else {
                StepResult::ok()
            }
        });
        let runner = PipelineRunner::new(vec![Box::new(plan), Box::new(implement)]);

        assert!(runner.run(&mut context).await);
        assert_eq!(plan_runs.load(Ordering::SeqCst), 2);
        assert_eq!(implement_runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_rerun_budget_on_failure_applies_criticality() {
        let dir = TempDir::new().unwrap();
        let mut context = test_support::context(dir.path(), "adw-run", Some(1));

        let (plan, plan_runs) = StubStep::ok("plan step");
        let (implement, _) = StubStep::with("implement step", true, |_| {
            StepResult::fail("plan not available").with_rerun_from("plan step")
        });
        let runner = PipelineRunner::new(vec![Box::new(plan), Box::new(implement)]);

        assert!(!runner.run(&mut context).await, "budget exhaustion surfaces the failure");
        assert_eq!(plan_runs.load(Ordering::SeqCst), MAX_RERUN_ITERATIONS);
    }

    #[tokio::test]
    async fn rerun_target_not_earlier_is_ignored() {
        let dir = TempDir::new().unwrap();
        let mut context = test_support::context(dir.path(), "adw-run", Some(1));

        let (a, _) = StubStep::with("step a", false, |_| {
            StepResult::ok().with_rerun_from("step b")
        });
        let (b, b_runs) = StubStep::ok("step b");
        let runner = PipelineRunner::new(vec![Box::new(a), Box::new(b)]);

        assert!(runner.run(&mut context).await);
        assert_eq!(b_runs.load(Ordering::SeqCst), 1, "no backward jump happened");
    }

    #[tokio::test]
    async fn single_step_requires_artifacts_when_dependent() {
        let dir = TempDir::new().unwrap();
        let mut context = test_support::context(dir.path(), "adw-run", Some(1));

        let (a, a_runs) = StubStep::ok("step a");
        let runner = PipelineRunner::new(vec![Box::new(a)]);

        // Dependent step over an empty workflow directory: refused.
        assert!(!runner
            .run_single_step("step a", &mut context, true)
            .await
            .unwrap());
        assert_eq!(a_runs.load(Ordering::SeqCst), 0);

        // Dependency-free step: runs.
        assert!(runner
            .run_single_step("step a", &mut context, false)
            .await
            .unwrap());
        assert_eq!(a_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_step_unknown_name_errors() {
        let dir = TempDir::new().unwrap();
        let mut context = test_support::context(dir.path(), "adw-run", Some(1));
        let runner = PipelineRunner::new(vec![]);
        let err = runner
            .run_single_step("missing step", &mut context, false)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::StepNotFound(_)));
    }

    #[test]
    fn create_context_rejects_missing_parent() {
        let dir = TempDir::new().unwrap();
        let result = PipelineRunner::create_context_in(
            dir.path(),
            Some(1),
            AdwId::from_string("adw-missing-parent-patch"),
            Some(AdwId::from_string("adw-missing-parent")),
            None,
            Arc::new(Notifier::disabled()),
        );
        assert!(matches!(
            result,
            Err(RunnerError::Artifact(ArtifactError::ParentNotFound(_)))
        ));
    }
}
