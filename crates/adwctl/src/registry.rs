//! Step registry: declarative metadata and dependency-graph reasoning.
//!
//! Each step registers a globally unique kebab-case slug, the artifact kinds
//! it consumes and produces, and its criticality. The registry answers
//! producer/consumer queries, resolves a topological execution order for any
//! step, and validates the whole graph.

use crate::steps::{
    acceptance::AcceptanceStep, classify::ClassifyStep, code_quality::CodeQualityStep,
    code_review::CodeReviewStep, compose_commits::ComposeCommitsStep,
    compose_request::ComposeRequestStep, fetch_issue::FetchIssueStep, fetch_patch::FetchPatchStep,
    gh_pull_request::GhPullRequestStep, git_setup::GitSetupStep,
    glab_pull_request::GlabPullRequestStep, implement::ImplementStep, patch_plan::PatchPlanStep,
    plan::PlanStep, review_fix::ReviewFixStep, WorkflowStep,
};
use adw_core::ArtifactKind;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("slug '{slug}' is already registered for step '{existing}'")]
    DuplicateSlug { slug: String, existing: String },
    #[error("unknown step: {0}")]
    UnknownStep(String),
    #[error("circular dependency detected involving step: {0}")]
    CircularDependency(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Constructor for a step instance.
pub type StepFactory = fn() -> Box<dyn WorkflowStep>;

/// Metadata for one registered step.
#[derive(Clone)]
pub struct StepMetadata {
    pub factory: StepFactory,
    /// Human label exposed by the step; used for logging and lookups.
    pub name: String,
    /// Globally unique kebab-case identifier.
    pub slug: String,
    pub dependencies: Vec<ArtifactKind>,
    pub outputs: Vec<ArtifactKind>,
    pub is_critical: bool,
    pub description: String,
}

impl std::fmt::Debug for StepMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepMetadata")
            .field("slug", &self.slug)
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("outputs", &self.outputs)
            .field("is_critical", &self.is_critical)
            .finish_non_exhaustive()
    }
}

/// Registry of step metadata, in registration order.
#[derive(Debug, Default)]
pub struct StepRegistry {
    steps: Vec<StepMetadata>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step with its dependency metadata.
    ///
    /// The factory is invoked once to capture the step's name and default
    /// criticality. Registering an existing slug for a different step fails;
    /// re-registering the same step replaces its metadata.
    pub fn register(
        &mut self,
        factory: StepFactory,
        slug: &str,
        dependencies: Vec<ArtifactKind>,
        outputs: Vec<ArtifactKind>,
        is_critical: Option<bool>,
        description: &str,
    ) -> Result<()> {
        let instance = factory();
        let name = instance.name().to_string();

        if let Some(existing) = self.steps.iter().find(|m| m.slug == slug) {
            if existing.name != name {
                return Err(RegistryError::DuplicateSlug {
                    slug: slug.to_string(),
                    existing: existing.name.clone(),
                });
            }
            self.steps.retain(|m| m.slug != slug);
        }

        let metadata = StepMetadata {
            factory,
            name: name.clone(),
            slug: slug.to_string(),
            dependencies,
            outputs,
            is_critical: is_critical.unwrap_or_else(|| instance.is_critical()),
            description: description.to_string(),
        };
        self.steps.push(metadata);
        debug!(step = %name, slug, "registered step");
        Ok(())
    }

    pub fn metadata_by_slug(&self, slug: &str) -> Option<&StepMetadata> {
        self.steps.iter().find(|m| m.slug == slug)
    }

    pub fn metadata_by_name(&self, name: &str) -> Option<&StepMetadata> {
        self.steps.iter().find(|m| m.name == name)
    }

    pub fn step_by_slug(&self, slug: &str) -> Option<Box<dyn WorkflowStep>> {
        self.metadata_by_slug(slug).map(|m| (m.factory)())
    }

    pub fn step_by_name(&self, name: &str) -> Option<Box<dyn WorkflowStep>> {
        self.metadata_by_name(name).map(|m| (m.factory)())
    }

    /// All registered steps in registration order.
    pub fn list_steps(&self) -> &[StepMetadata] {
        &self.steps
    }

    /// Steps producing the given artifact kind.
    pub fn producers_of(&self, kind: ArtifactKind) -> Vec<String> {
        self.steps
            .iter()
            .filter(|m| m.outputs.contains(&kind))
            .map(|m| m.name.clone())
            .collect()
    }

    /// Steps consuming the given artifact kind.
    pub fn consumers_of(&self, kind: ArtifactKind) -> Vec<String> {
        self.steps
            .iter()
            .filter(|m| m.dependencies.contains(&kind))
            .map(|m| m.name.clone())
            .collect()
    }

    /// Map each artifact kind to one producing step.
    ///
    /// When several steps produce the same kind the last registration wins,
    /// which keeps resolution reproducible within a process.
    fn artifact_producers(&self) -> HashMap<ArtifactKind, String> {
        let mut producers = HashMap::new();
        for metadata in &self.steps {
            for output in &metadata.outputs {
                producers.insert(*output, metadata.name.clone());
            }
        }
        producers
    }

    /// Resolve the upstream execution order for a step.
    ///
    /// Topological sort over the artifact-producer graph: every returned
    /// step precedes the steps depending on it, and the target itself is
    /// excluded.
    pub fn resolve_dependencies(&self, step_name: &str) -> Result<Vec<String>> {
        if self.metadata_by_name(step_name).is_none() {
            return Err(RegistryError::UnknownStep(step_name.to_string()));
        }
        let producers = self.artifact_producers();

        let mut visited: HashSet<String> = HashSet::new();
        let mut in_progress: HashSet<String> = HashSet::new();
        let mut order: Vec<String> = Vec::new();

        fn visit(
            registry: &StepRegistry,
            producers: &HashMap<ArtifactKind, String>,
            name: &str,
            visited: &mut HashSet<String>,
            in_progress: &mut HashSet<String>,
            order: &mut Vec<String>,
        ) -> Result<()> {
            if visited.contains(name) {
                return Ok(());
            }
            if in_progress.contains(name) {
                return Err(RegistryError::CircularDependency(name.to_string()));
            }
            in_progress.insert(name.to_string());
            if let Some(metadata) = registry.metadata_by_name(name) {
                for dep in &metadata.dependencies {
                    if let Some(producer) = producers.get(dep) {
                        if producer != name {
                            visit(registry, producers, producer, visited, in_progress, order)?;
                        }
                    }
                }
            }
            in_progress.remove(name);
            visited.insert(name.to_string());
            order.push(name.to_string());
            Ok(())
        }

        visit(
            self,
            &producers,
            step_name,
            &mut visited,
            &mut in_progress,
            &mut order,
        )?;
        order.retain(|n| n != step_name);
        Ok(order)
    }

    /// Walk all registered steps and report graph problems.
    ///
    /// Reports dependencies with no registered producer and circular
    /// dependencies; an empty result means the graph is healthy.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let producers = self.artifact_producers();

        for metadata in &self.steps {
            for dep in &metadata.dependencies {
                if !producers.contains_key(dep) {
                    issues.push(format!(
                        "step '{}' requires artifact '{dep}' but no step produces it",
                        metadata.name
                    ));
                }
            }
        }

        let mut seen_cycles = HashSet::new();
        for metadata in &self.steps {
            if let Err(e @ RegistryError::CircularDependency(_)) =
                self.resolve_dependencies(&metadata.name)
            {
                let message = e.to_string();
                if seen_cycles.insert(message.clone()) {
                    issues.push(message);
                }
            }
        }
        issues
    }
}

/// Register the default step set.
pub fn register_default_steps(registry: &mut StepRegistry) -> Result<()> {
    use ArtifactKind as K;

    registry.register(
        || Box::new(GitSetupStep),
        "git-setup",
        vec![],
        vec![K::GitSetup],
        None,
        "Set up the git environment for workflow execution",
    )?;
    registry.register(
        || Box::new(FetchIssueStep),
        "fetch-issue",
        vec![],
        vec![K::FetchIssue],
        None,
        "Fetch the issue from the shared store",
    )?;
    registry.register(
        || Box::new(FetchPatchStep),
        "fetch-patch",
        vec![],
        vec![K::FetchPatch],
        None,
        "Fetch a pending patch issue from the shared store",
    )?;
    registry.register(
        || Box::new(ClassifyStep),
        "classify",
        vec![K::FetchIssue],
        vec![K::Classify],
        None,
        "Classify issue type and complexity",
    )?;
    registry.register(
        || Box::new(PlanStep),
        "plan",
        vec![K::FetchIssue, K::Classify],
        vec![K::Plan],
        None,
        "Build the implementation plan for the issue",
    )?;
    registry.register(
        || Box::new(PatchPlanStep),
        "patch-plan",
        vec![K::FetchPatch],
        vec![K::PatchPlan],
        None,
        "Build a standalone implementation plan for a patch issue",
    )?;
    registry.register(
        || Box::new(ImplementStep::default()),
        "implement",
        vec![K::Plan],
        vec![K::Implement],
        None,
        "Execute the implementation plan",
    )?;
    registry.register(
        || Box::new(CodeReviewStep),
        "code-review",
        vec![K::Plan],
        vec![K::CodeReview],
        None,
        "Generate a code review for the implementation",
    )?;
    registry.register(
        || Box::new(ReviewFixStep),
        "review-fix",
        vec![K::CodeReview],
        vec![K::ReviewFix],
        None,
        "Address review issues and suggestions",
    )?;
    registry.register(
        || Box::new(CodeQualityStep),
        "code-quality",
        vec![K::Implement],
        vec![K::CodeQuality],
        None,
        "Run code quality checks (linting, type checking)",
    )?;
    registry.register(
        || Box::new(AcceptanceStep::main()),
        "acceptance",
        vec![K::Plan],
        vec![K::Acceptance],
        None,
        "Validate the implementation against acceptance criteria",
    )?;
    registry.register(
        || Box::new(AcceptanceStep::patch()),
        "patch-acceptance",
        vec![K::PatchPlan],
        vec![K::PatchAcceptance],
        None,
        "Validate a patch implementation against acceptance criteria",
    )?;
    registry.register(
        || Box::new(ComposeRequestStep),
        "compose-request",
        vec![K::Acceptance],
        vec![K::ComposeRequest],
        None,
        "Prepare pull request metadata and commits",
    )?;
    registry.register(
        || Box::new(GhPullRequestStep),
        "gh-pull-request",
        vec![K::ComposeRequest],
        vec![K::GhPullRequest],
        None,
        "Create a GitHub pull request via the gh CLI",
    )?;
    registry.register(
        || Box::new(GlabPullRequestStep),
        "glab-pull-request",
        vec![K::ComposeRequest],
        vec![K::GlabPullRequest],
        None,
        "Create a GitLab merge request via the glab CLI",
    )?;
    registry.register(
        || Box::new(ComposeCommitsStep),
        "compose-commits",
        vec![],
        vec![K::ComposeCommits],
        None,
        "Push patch commits to an existing PR/MR",
    )?;
    Ok(())
}

/// Build a registry pre-populated with the default steps.
pub fn with_default_steps() -> StepRegistry {
    let mut registry = StepRegistry::new();
    register_default_steps(&mut registry).expect("default step registration is internally consistent");
    registry
}

static GLOBAL_REGISTRY: OnceLock<Mutex<Option<Arc<StepRegistry>>>> = OnceLock::new();

fn global_slot() -> &'static Mutex<Option<Arc<StepRegistry>>> {
    GLOBAL_REGISTRY.get_or_init(|| Mutex::new(None))
}

/// Process-global registry, lazily initialised with the default steps.
pub fn get_step_registry() -> Arc<StepRegistry> {
    let mut slot = global_slot().lock().expect("registry lock poisoned");
    if let Some(registry) = slot.as_ref() {
        return Arc::clone(registry);
    }
    let registry = Arc::new(with_default_steps());
    *slot = Some(Arc::clone(&registry));
    registry
}

/// Drop the global registry so the next access re-initialises it. For tests.
pub fn reset_step_registry() {
    let mut slot = global_slot().lock().expect("registry lock poisoned");
    *slot = None;
}
