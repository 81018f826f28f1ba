//! adwctl - ADW pipeline driver and operator CLI.
//!
//! Library components for the driver binary: agent providers, the comment
//! notifier, step implementations, the step and workflow registries, and
//! the pipeline runner.

pub mod agents;
pub mod exec;
pub mod notify;
pub mod registry;
pub mod runner;
pub mod steps;
pub mod workflows;

use adw_core::{config, AdwId, IssueStore, WorkflowKind};
use notify::Notifier;
use runner::PipelineRunner;
use std::sync::Arc;
use tracing::{info, warn};

/// Type alias for application-level errors with context.
pub type AppResult<T> = eyre::Result<T>;

/// Inputs for one pipeline run, as parsed from the CLI.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub issue_id: Option<i64>,
    pub adw_id: Option<AdwId>,
    pub kind: WorkflowKind,
}

/// Resolve the run and parent workflow ids for a patch run.
///
/// Preference order: an explicitly supplied `-patch` id carries its parent
/// in its suffix; otherwise the parent is the issue row's recorded `adw_id`
/// (stamped by the main run); otherwise a non-patch supplied id is taken as
/// the parent itself. With none of these the patch cannot be parented.
pub fn resolve_patch_ids(
    cli_adw_id: Option<&AdwId>,
    issue_adw_id: Option<&str>,
) -> eyre::Result<(AdwId, AdwId)> {
    if let Some(id) = cli_adw_id {
        if id.is_patch() {
            let parent = id.parent().expect("patch id has a parent prefix");
            return Ok((id.clone(), parent));
        }
    }
    if let Some(parent) = issue_adw_id.map(str::trim).filter(|s| !s.is_empty()) {
        let parent = AdwId::from_string(parent);
        return Ok((parent.patch_child(), parent));
    }
    if let Some(parent) = cli_adw_id {
        return Ok((parent.patch_child(), parent.clone()));
    }
    eyre::bail!("patch workflow requires a parent workflow id (issue has no adw_id on record)")
}

/// Build the step pipeline for a workflow kind.
///
/// `WORKFLOW_REGISTRY_FLAG` routes resolution through the workflow
/// registry; the direct path composes an identical pipeline.
fn build_pipeline(kind: WorkflowKind) -> Vec<Box<dyn steps::WorkflowStep>> {
    let platform = config::platform();
    if config::registry_flag_enabled() {
        let registry = workflows::WorkflowRegistry::with_defaults(platform);
        registry
            .get_pipeline(kind)
            .expect("default workflow registry covers all kinds")
    } else {
        workflows::default_pipeline(kind, platform)
    }
}

/// Execute one workflow run end to end. Returns the run's success flag.
pub async fn run_pipeline(options: RunOptions) -> AppResult<bool> {
    let issue_store = match IssueStore::from_env() {
        Ok(store) => Some(Arc::new(store)),
        Err(e) if options.kind == WorkflowKind::Codereview => {
            warn!(error = %e, "issue store unavailable, running standalone codereview");
            None
        }
        Err(e) => return Err(eyre::eyre!("issue store configuration error: {e}")),
    };

    if options.issue_id.is_none() && options.kind != WorkflowKind::Codereview {
        eyre::bail!("issue id is required for {} workflows", options.kind.as_str());
    }

    let (adw_id, parent_workflow_id) = match options.kind {
        WorkflowKind::Patch => {
            let issue_id = options.issue_id.expect("checked above");
            let store = issue_store
                .as_ref()
                .ok_or_else(|| eyre::eyre!("issue store required for patch workflows"))?;
            let issue = store.fetch_issue(issue_id).await?;
            let (run, parent) =
                resolve_patch_ids(options.adw_id.as_ref(), issue.adw_id.as_deref())?;
            (run, Some(parent))
        }
        _ => (
            options.adw_id.clone().unwrap_or_else(AdwId::generate),
            None,
        ),
    };

    info!(
        adw_id = %adw_id,
        parent = ?parent_workflow_id,
        kind = options.kind.as_str(),
        issue_id = ?options.issue_id,
        "resolved workflow identifiers"
    );

    let notifier = Arc::new(Notifier::new(
        issue_store.as_ref().map(|s| (**s).clone()),
    ));
    let runner = PipelineRunner::new(build_pipeline(options.kind));
    let mut context = PipelineRunner::create_context(
        options.issue_id,
        adw_id,
        parent_workflow_id,
        issue_store,
        notifier,
    )?;

    Ok(runner.run(&mut context).await)
}
