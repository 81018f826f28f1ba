//! Workflow registry: named pipelines composed of step factories.
//!
//! The `main` pipeline's PR-creation tail is platform-conditional and
//! resolved at pipeline-construction time; unsupported platform values
//! simply omit the PR step.

use crate::registry::StepFactory;
use crate::steps::{
    acceptance::AcceptanceStep, classify::ClassifyStep, code_quality::CodeQualityStep,
    code_review::CodeReviewStep, compose_commits::ComposeCommitsStep,
    compose_request::ComposeRequestStep, fetch_issue::FetchIssueStep, fetch_patch::FetchPatchStep,
    gh_pull_request::GhPullRequestStep, git_setup::GitSetupStep,
    glab_pull_request::GlabPullRequestStep, implement::ImplementStep, patch_plan::PatchPlanStep,
    plan::PlanStep, review_fix::ReviewFixStep, WorkflowStep,
};
use adw_core::{Platform, WorkflowKind};

/// A named, ordered pipeline.
pub struct WorkflowDefinition {
    pub kind: WorkflowKind,
    pub factories: Vec<StepFactory>,
    pub description: String,
}

impl std::fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("kind", &self.kind)
            .field("steps", &self.factories.len())
            .finish_non_exhaustive()
    }
}

/// Registry of workflow definitions.
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    definitions: Vec<WorkflowDefinition>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition, replacing any previous one of the same kind.
    pub fn register(&mut self, definition: WorkflowDefinition) {
        self.definitions.retain(|d| d.kind != definition.kind);
        self.definitions.push(definition);
    }

    pub fn is_registered(&self, kind: WorkflowKind) -> bool {
        self.definitions.iter().any(|d| d.kind == kind)
    }

    /// Registered workflow kinds, sorted by name.
    pub fn list_types(&self) -> Vec<WorkflowKind> {
        let mut kinds: Vec<WorkflowKind> = self.definitions.iter().map(|d| d.kind).collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    /// Instantiate the pipeline for a workflow kind.
    pub fn get_pipeline(&self, kind: WorkflowKind) -> Option<Vec<Box<dyn WorkflowStep>>> {
        self.definitions
            .iter()
            .find(|d| d.kind == kind)
            .map(|d| d.factories.iter().map(|f| f()).collect())
    }

    /// Build a registry with the default pipelines, with the `main`
    /// pipeline's PR step selected by the given platform.
    pub fn with_defaults(platform: Option<Platform>) -> Self {
        let mut registry = Self::new();
        registry.register(WorkflowDefinition {
            kind: WorkflowKind::Main,
            factories: main_pipeline_factories(platform),
            description: "Full issue pipeline: classify, plan, implement, review, accept, PR"
                .to_string(),
        });
        registry.register(WorkflowDefinition {
            kind: WorkflowKind::Patch,
            factories: patch_pipeline_factories(),
            description: "Follow-up patch pipeline reusing the parent workflow's shared artifacts"
                .to_string(),
        });
        registry.register(WorkflowDefinition {
            kind: WorkflowKind::Codereview,
            factories: codereview_pipeline_factories(),
            description: "Standalone review/fix/quality loop over the current checkout"
                .to_string(),
        });
        registry
    }
}

fn main_pipeline_factories(platform: Option<Platform>) -> Vec<StepFactory> {
    let mut factories: Vec<StepFactory> = vec![
        || Box::new(GitSetupStep),
        || Box::new(FetchIssueStep),
        || Box::new(ClassifyStep),
        || Box::new(PlanStep),
        || Box::new(ImplementStep::default()),
        || Box::new(CodeReviewStep),
        || Box::new(ReviewFixStep),
        || Box::new(CodeQualityStep),
        || Box::new(AcceptanceStep::main()),
        || Box::new(ComposeRequestStep),
    ];
    match platform {
        Some(Platform::Github) => factories.push(|| Box::new(GhPullRequestStep)),
        Some(Platform::Gitlab) => factories.push(|| Box::new(GlabPullRequestStep)),
        None => {}
    }
    factories
}

fn patch_pipeline_factories() -> Vec<StepFactory> {
    vec![
        || Box::new(FetchPatchStep),
        || Box::new(PatchPlanStep),
        || Box::new(ImplementStep::for_patch()),
        || Box::new(CodeReviewStep),
        || Box::new(ReviewFixStep),
        || Box::new(CodeQualityStep),
        || Box::new(AcceptanceStep::patch()),
        || Box::new(ComposeCommitsStep),
    ]
}

fn codereview_pipeline_factories() -> Vec<StepFactory> {
    vec![
        || Box::new(CodeReviewStep),
        || Box::new(ReviewFixStep),
        || Box::new(CodeQualityStep),
    ]
}

/// Instantiate a default pipeline directly, outside the registry.
///
/// The driver uses this path unless `WORKFLOW_REGISTRY_FLAG` opts into
/// registry-based resolution; both produce identical pipelines.
pub fn default_pipeline(
    kind: WorkflowKind,
    platform: Option<Platform>,
) -> Vec<Box<dyn WorkflowStep>> {
    let factories = match kind {
        WorkflowKind::Main => main_pipeline_factories(platform),
        WorkflowKind::Patch => patch_pipeline_factories(),
        WorkflowKind::Codereview => codereview_pipeline_factories(),
    };
    factories.iter().map(|f| f()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::compose_commits::COMPOSE_COMMITS_STEP_NAME;
    use crate::steps::fetch_patch::FETCH_PATCH_STEP_NAME;
    use crate::steps::gh_pull_request::GH_PULL_REQUEST_STEP_NAME;
    use crate::steps::git_setup::GIT_SETUP_STEP_NAME;
    use crate::steps::glab_pull_request::GLAB_PULL_REQUEST_STEP_NAME;

    fn names(pipeline: &[Box<dyn WorkflowStep>]) -> Vec<&str> {
        pipeline.iter().map(|s| s.name()).collect()
    }

    #[test]
    fn main_pipeline_without_platform_omits_pr_step() {
        let pipeline = default_pipeline(WorkflowKind::Main, None);
        assert_eq!(pipeline.len(), 10);
        assert_eq!(names(&pipeline)[0], GIT_SETUP_STEP_NAME);
        assert!(!names(&pipeline).contains(&GH_PULL_REQUEST_STEP_NAME));
        assert!(!names(&pipeline).contains(&GLAB_PULL_REQUEST_STEP_NAME));
    }

    #[test]
    fn main_pipeline_github_appends_gh_step() {
        let pipeline = default_pipeline(WorkflowKind::Main, Some(Platform::Github));
        assert_eq!(pipeline.len(), 11);
        assert_eq!(names(&pipeline).last().copied(), Some(GH_PULL_REQUEST_STEP_NAME));
    }

    #[test]
    fn main_pipeline_gitlab_appends_glab_step() {
        let pipeline = default_pipeline(WorkflowKind::Main, Some(Platform::Gitlab));
        assert_eq!(names(&pipeline).last().copied(), Some(GLAB_PULL_REQUEST_STEP_NAME));
    }

    #[test]
    fn patch_pipeline_starts_with_fetch_patch_and_ends_with_compose_commits() {
        let pipeline = default_pipeline(WorkflowKind::Patch, None);
        let names = names(&pipeline);
        assert_eq!(names.first().copied(), Some(FETCH_PATCH_STEP_NAME));
        assert_eq!(names.last().copied(), Some(COMPOSE_COMMITS_STEP_NAME));
        assert_eq!(pipeline.len(), 8);
    }

    #[test]
    fn codereview_pipeline_is_the_review_loop() {
        let pipeline = default_pipeline(WorkflowKind::Codereview, None);
        assert_eq!(pipeline.len(), 3);
    }

    #[test]
    fn registry_lists_types_sorted() {
        let registry = WorkflowRegistry::with_defaults(None);
        assert_eq!(
            registry.list_types(),
            vec![WorkflowKind::Codereview, WorkflowKind::Main, WorkflowKind::Patch]
        );
        assert!(registry.is_registered(WorkflowKind::Main));
    }

    #[test]
    fn registry_pipeline_matches_direct_construction() {
        let registry = WorkflowRegistry::with_defaults(Some(Platform::Github));
        let from_registry = registry.get_pipeline(WorkflowKind::Main).unwrap();
        let direct = default_pipeline(WorkflowKind::Main, Some(Platform::Github));
        assert_eq!(names(&from_registry), names(&direct));
    }

    #[test]
    fn reregistering_replaces_definition() {
        let mut registry = WorkflowRegistry::with_defaults(None);
        registry.register(WorkflowDefinition {
            kind: WorkflowKind::Codereview,
            factories: vec![|| Box::new(CodeReviewStep)],
            description: "review only".to_string(),
        });
        assert_eq!(registry.get_pipeline(WorkflowKind::Codereview).unwrap().len(), 1);
        assert_eq!(registry.list_types().len(), 3);
    }
}
