//! Workflow step framework: the step trait, the per-run context, and the
//! algebraic step result the runner dispatches on.
//!
//! Steps are thin adapters with a common shape: load declared inputs from
//! the context cache or the artifact store, call the configured agent or
//! external tool, validate the output, persist the artifact, emit progress
//! comments, and return a [`StepResult`].

pub mod acceptance;
pub mod classify;
pub mod code_quality;
pub mod code_review;
pub mod compose_commits;
pub mod compose_request;
pub mod fetch_issue;
pub mod fetch_patch;
pub mod git_setup;
pub mod gh_pull_request;
pub mod glab_pull_request;
pub mod implement;
pub mod patch_plan;
pub mod plan;
pub mod review_fix;

use crate::agents::{get_agent, AgentRequest, AgentResponse};
use crate::notify::{CommentPayload, Notifier, ProgressCommentHandler};
use adw_core::{
    AdwId, Artifact, ArtifactKind, ArtifactPayload, ArtifactStore, ClassifyData, CommitPlan,
    ImplementData, Issue, IssueStore, PlanData,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Algebraic return from every step.
#[derive(Debug, Clone, Default)]
pub struct StepResult {
    pub success: bool,
    /// Optional step-specific payload for the caller.
    pub data: Option<Value>,
    pub error: Option<String>,
    /// When set, the runner re-enters the pipeline from the named earlier
    /// step, subject to the per-step iteration budget.
    pub rerun_from: Option<String>,
    /// Validated JSON from the agent, when the step parses one.
    pub parsed: Option<Value>,
}

impl StepResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn ok_with_parsed(parsed: Value) -> Self {
        Self {
            success: true,
            parsed: Some(parsed),
            ..Self::default()
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_rerun_from(mut self, step_name: impl Into<String>) -> Self {
        self.rerun_from = Some(step_name.into());
        self
    }
}

/// Prepared pull-request metadata handed from compose-request to the PR
/// creation steps.
#[derive(Debug, Clone)]
pub struct PrDetails {
    pub title: String,
    pub summary: String,
    pub commits: Vec<CommitPlan>,
}

/// Per-run cache for fast inter-step hand-off.
///
/// Durable state always flows through the artifact store; these slots only
/// save re-reading artifacts within a single run.
#[derive(Debug, Default)]
pub struct ContextData {
    pub issue: Option<Issue>,
    pub patch_issue: Option<Issue>,
    pub classify: Option<ClassifyData>,
    pub plan: Option<PlanData>,
    pub implement: Option<ImplementData>,
    pub review_text: Option<String>,
    pub review_is_clean: bool,
    pub base_commit: Option<String>,
    pub pr_details: Option<PrDetails>,
    /// Rerun counters, keyed by the name of the step requesting re-entry.
    /// Owned by the runner.
    pub rerun_counts: HashMap<String, u32>,
}

/// Per-run mutable carrier created by the runner and discarded at run end.
pub struct WorkflowContext {
    /// Absent for standalone `codereview` runs.
    pub issue_id: Option<i64>,
    pub adw_id: AdwId,
    pub store: ArtifactStore,
    pub issue_store: Option<Arc<IssueStore>>,
    pub notifier: Arc<Notifier>,
    pub data: ContextData,
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("issue_id", &self.issue_id)
            .field("adw_id", &self.adw_id)
            .finish_non_exhaustive()
    }
}

impl WorkflowContext {
    pub fn new(
        issue_id: Option<i64>,
        adw_id: AdwId,
        store: ArtifactStore,
        issue_store: Option<Arc<IssueStore>>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            issue_id,
            adw_id,
            store,
            issue_store,
            notifier,
            data: ContextData::default(),
        }
    }

    /// Write an artifact and mirror it into the issue log, best-effort.
    pub async fn save_artifact(&self, payload: ArtifactPayload) -> adw_core::artifacts::Result<()> {
        let artifact = Artifact::new(&self.adw_id, payload);
        self.store.write(&artifact)?;
        let (_, message) = self
            .notifier
            .emit_artifact_comment(self.issue_id, &self.adw_id, &artifact)
            .await;
        debug!("{message}");
        Ok(())
    }

    /// Issue from the cache, else the `fetch-issue` artifact (cached after).
    pub fn issue(&mut self) -> Option<Issue> {
        if self.data.issue.is_none() {
            if let Ok(artifact) = self.store.read(ArtifactKind::FetchIssue) {
                if let ArtifactPayload::FetchIssue { issue } = artifact.payload {
                    self.data.issue = Some(issue);
                }
            }
        }
        self.data.issue.clone()
    }

    /// Patch issue from the cache, else the `fetch-patch` artifact.
    pub fn patch_issue(&mut self) -> Option<Issue> {
        if self.data.patch_issue.is_none() {
            if let Ok(artifact) = self.store.read(ArtifactKind::FetchPatch) {
                if let ArtifactPayload::FetchPatch { issue } = artifact.payload {
                    self.data.patch_issue = Some(issue);
                }
            }
        }
        self.data.patch_issue.clone()
    }

    /// Classification from the cache, else the `classify` artifact.
    pub fn classify_data(&mut self) -> Option<ClassifyData> {
        if self.data.classify.is_none() {
            if let Ok(artifact) = self.store.read(ArtifactKind::Classify) {
                if let ArtifactPayload::Classify { classify } = artifact.payload {
                    self.data.classify = Some(classify);
                }
            }
        }
        self.data.classify.clone()
    }

    /// Plan from the cache, else the given plan artifact kind.
    ///
    /// Main workflows read `plan`; patch workflows read `patch-plan`.
    pub fn plan_data(&mut self, kind: ArtifactKind) -> Option<PlanData> {
        if self.data.plan.is_none() {
            if let Ok(artifact) = self.store.read(kind) {
                match artifact.payload {
                    ArtifactPayload::Plan { plan } | ArtifactPayload::PatchPlan { plan } => {
                        self.data.plan = Some(plan);
                    }
                    other => {
                        warn!(kind = %kind, found = %other.kind(), "unexpected plan payload");
                    }
                }
            }
        }
        self.data.plan.clone()
    }

    /// Implementation data from the cache, else the `implement` artifact.
    pub fn implement_data(&mut self) -> Option<ImplementData> {
        if self.data.implement.is_none() {
            if let Ok(artifact) = self.store.read(ArtifactKind::Implement) {
                if let ArtifactPayload::Implement { implement } = artifact.payload {
                    self.data.implement = Some(implement);
                }
            }
        }
        self.data.implement.clone()
    }

    /// Review text from the cache, else the `code-review` artifact.
    pub fn review_text(&mut self) -> Option<String> {
        if self.data.review_text.is_none() {
            if let Ok(artifact) = self.store.read(ArtifactKind::CodeReview) {
                if let ArtifactPayload::CodeReview { review_text } = artifact.payload {
                    self.data.review_text = Some(review_text);
                }
            }
        }
        self.data.review_text.clone()
    }

    /// PR metadata from the cache, else the `compose-request` artifact.
    pub fn pr_details(&mut self) -> Option<PrDetails> {
        if self.data.pr_details.is_none() {
            if let Ok(artifact) = self.store.read(ArtifactKind::ComposeRequest) {
                if let ArtifactPayload::ComposeRequest {
                    title,
                    summary,
                    commits,
                } = artifact.payload
                {
                    self.data.pr_details = Some(PrDetails {
                        title,
                        summary,
                        commits,
                    });
                }
            }
        }
        self.data.pr_details.clone()
    }
}

/// One unit of work in a pipeline.
#[async_trait]
pub trait WorkflowStep: Send + Sync {
    /// Human label, used in logs and as the `rerun_from` target.
    fn name(&self) -> &str;

    /// Critical steps abort the workflow on failure; best-effort steps log
    /// and continue.
    fn is_critical(&self) -> bool {
        true
    }

    async fn run(&self, context: &mut WorkflowContext) -> StepResult;
}

/// Execute a slash-command template through the named provider, wiring the
/// progress-comment stream handler.
pub async fn execute_agent_template(
    context: &WorkflowContext,
    agent_name: &str,
    command: &str,
    args: &[&str],
    model: Option<&str>,
    json_schema: Option<&str>,
    provider: &str,
) -> AgentResponse {
    let mut prompt = command.to_string();
    for arg in args {
        prompt.push(' ');
        prompt.push_str(arg);
    }

    let mut request =
        AgentRequest::new(prompt, context.adw_id.clone(), agent_name).with_issue(context.issue_id);
    if let Some(model) = model {
        request = request.with_model(model);
    }
    if let Some(schema) = json_schema {
        request = request.with_schema(schema);
    }

    let handler = ProgressCommentHandler::new(
        Arc::clone(&context.notifier),
        context.issue_id,
        context.adw_id.clone(),
        provider,
    );

    let agent = get_agent(provider);
    agent
        .execute(&request, Some(&handler as &dyn crate::agents::StreamHandler))
        .await
}

/// Characters of raw agent output included in validation diagnostics.
const DIAGNOSTIC_OUTPUT_LIMIT: usize = 500;

/// Emit the diagnostic comment for agent output that failed validation.
pub async fn emit_validation_failure(
    notifier: &Notifier,
    issue_id: Option<i64>,
    adw_id: &AdwId,
    step_label: &str,
    raw_output: &str,
    error: &str,
) {
    let preview: String = raw_output.chars().take(DIAGNOSTIC_OUTPUT_LIMIT).collect();
    let payload = CommentPayload::workflow(
        issue_id,
        adw_id,
        format!("{step_label} returned invalid output"),
        serde_json::json!({
            "error": error,
            "output": preview,
        }),
    );
    notifier.emit_and_log(&payload).await;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::path::Path;

    /// Build a bare context over a fresh store, without any issue store.
    pub fn context(base: &Path, adw_id: &str, issue_id: Option<i64>) -> WorkflowContext {
        let store = ArtifactStore::open(base, AdwId::from_string(adw_id), None).unwrap();
        WorkflowContext::new(
            issue_id,
            AdwId::from_string(adw_id),
            store,
            None,
            Arc::new(Notifier::disabled()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adw_core::{ImplementStatus, IssueStatus, IssueType};
    use tempfile::TempDir;

    #[tokio::test]
    async fn save_artifact_persists_to_store() {
        let dir = TempDir::new().unwrap();
        let context = test_support::context(dir.path(), "adw-ctx", Some(1));
        context
            .save_artifact(ArtifactPayload::CodeReview {
                review_text: "Review completed".to_string(),
            })
            .await
            .unwrap();
        assert!(context.store.exists(ArtifactKind::CodeReview));
    }

    #[tokio::test]
    async fn plan_loads_from_artifact_and_caches() {
        let dir = TempDir::new().unwrap();
        let mut context = test_support::context(dir.path(), "adw-ctx", Some(1));
        context
            .save_artifact(ArtifactPayload::Plan {
                plan: PlanData {
                    output: "o".to_string(),
                    plan: "# Plan".to_string(),
                    summary: "s".to_string(),
                },
            })
            .await
            .unwrap();

        assert!(context.data.plan.is_none());
        let plan = context.plan_data(ArtifactKind::Plan).unwrap();
        assert_eq!(plan.summary, "s");
        assert!(context.data.plan.is_some());

        // A second load must come from the cache even if the file vanishes.
        context.store.delete(ArtifactKind::Plan).unwrap();
        assert!(context.plan_data(ArtifactKind::Plan).is_some());
    }

    #[tokio::test]
    async fn missing_inputs_resolve_to_none() {
        let dir = TempDir::new().unwrap();
        let mut context = test_support::context(dir.path(), "adw-ctx", Some(1));
        assert!(context.issue().is_none());
        assert!(context.classify_data().is_none());
        assert!(context.implement_data().is_none());
        assert!(context.review_text().is_none());
        assert!(context.pr_details().is_none());
    }

    #[tokio::test]
    async fn implement_data_round_trips_through_context() {
        let dir = TempDir::new().unwrap();
        let mut context = test_support::context(dir.path(), "adw-ctx", Some(1));
        context
            .save_artifact(ArtifactPayload::Implement {
                implement: ImplementData {
                    files_modified: vec!["ui.css".to_string()],
                    git_diff_stat: "1 file".to_string(),
                    output: "done".to_string(),
                    status: ImplementStatus::Success,
                    summary: "done".to_string(),
                },
            })
            .await
            .unwrap();
        let implement = context.implement_data().unwrap();
        assert_eq!(implement.files_modified, vec!["ui.css"]);
    }

    #[tokio::test]
    async fn issue_round_trips_through_context() {
        let dir = TempDir::new().unwrap();
        let mut context = test_support::context(dir.path(), "adw-ctx", Some(1));
        let issue = Issue {
            id: 1,
            title: None,
            description: "Add dark mode toggle".to_string(),
            status: IssueStatus::Started,
            issue_type: IssueType::Main,
            adw_id: None,
            branch: None,
            assigned_to: None,
            created_at: None,
            updated_at: None,
        };
        context
            .save_artifact(ArtifactPayload::FetchIssue { issue })
            .await
            .unwrap();
        assert_eq!(context.issue().unwrap().id, 1);
    }

    #[test]
    fn step_result_constructors() {
        let ok = StepResult::ok();
        assert!(ok.success && ok.error.is_none());

        let fail = StepResult::fail("plan not available")
            .with_rerun_from("Building implementation plan");
        assert!(!fail.success);
        assert_eq!(fail.rerun_from.as_deref(), Some("Building implementation plan"));
    }
}
