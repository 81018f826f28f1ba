//! Typed workflow artifacts and the filesystem-backed artifact store.
//!
//! Every pipeline step persists its output as one JSON file per artifact
//! kind under `<data_root>/workflows/<adw_id>/`. Shared kinds may be resolved
//! from a parent workflow directory when a patch workflow misses them
//! locally; patch-specific kinds never fall back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{AdwId, Issue};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("parent workflow directory not found: {0}")]
    ParentNotFound(PathBuf),
    #[error("artifact not found: {0}")]
    NotFound(ArtifactKind),
    #[error("corrupted artifact JSON for {kind}: {source}")]
    Corrupted {
        kind: ArtifactKind,
        source: serde_json::Error,
    },
    #[error("artifact file {path} holds kind {found}, expected {expected}")]
    KindMismatch {
        path: PathBuf,
        expected: ArtifactKind,
        found: ArtifactKind,
    },
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Closed enumeration of artifact kinds. The kebab-case string doubles as the
/// on-disk file stem (`<kind>.json`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    GitSetup,
    FetchIssue,
    FetchPatch,
    Classify,
    Plan,
    PatchPlan,
    Implement,
    CodeReview,
    ReviewFix,
    CodeQuality,
    Acceptance,
    PatchAcceptance,
    ComposeRequest,
    GhPullRequest,
    GlabPullRequest,
    ComposeCommits,
}

/// All kinds, in pipeline-ish order. Used for listing and CLI display.
pub const ALL_ARTIFACT_KINDS: [ArtifactKind; 16] = [
    ArtifactKind::GitSetup,
    ArtifactKind::FetchIssue,
    ArtifactKind::FetchPatch,
    ArtifactKind::Classify,
    ArtifactKind::Plan,
    ArtifactKind::PatchPlan,
    ArtifactKind::Implement,
    ArtifactKind::CodeReview,
    ArtifactKind::ReviewFix,
    ArtifactKind::CodeQuality,
    ArtifactKind::Acceptance,
    ArtifactKind::PatchAcceptance,
    ArtifactKind::ComposeRequest,
    ArtifactKind::GhPullRequest,
    ArtifactKind::GlabPullRequest,
    ArtifactKind::ComposeCommits,
];

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GitSetup => "git-setup",
            Self::FetchIssue => "fetch-issue",
            Self::FetchPatch => "fetch-patch",
            Self::Classify => "classify",
            Self::Plan => "plan",
            Self::PatchPlan => "patch-plan",
            Self::Implement => "implement",
            Self::CodeReview => "code-review",
            Self::ReviewFix => "review-fix",
            Self::CodeQuality => "code-quality",
            Self::Acceptance => "acceptance",
            Self::PatchAcceptance => "patch-acceptance",
            Self::ComposeRequest => "compose-request",
            Self::GhPullRequest => "gh-pull-request",
            Self::GlabPullRequest => "glab-pull-request",
            Self::ComposeCommits => "compose-commits",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        ALL_ARTIFACT_KINDS.iter().copied().find(|k| k.as_str() == value)
    }

    /// Shared kinds are readable from the parent workflow directory when a
    /// patch workflow misses them locally. Everything else is strictly local.
    pub fn is_shared(&self) -> bool {
        matches!(
            self,
            Self::FetchIssue
                | Self::Classify
                | Self::Plan
                | Self::ComposeRequest
                | Self::GhPullRequest
                | Self::GlabPullRequest
        )
    }

    fn file_name(&self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// --- Step output payloads ---

/// Issue classification axes produced by the classify agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueClass {
    Bug,
    Chore,
    Feature,
}

impl IssueClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bug => "bug",
            Self::Chore => "chore",
            Self::Feature => "feature",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "bug" => Some(Self::Bug),
            "chore" => Some(Self::Chore),
            "feature" => Some(Self::Feature),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Average,
    Complex,
    Critical,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Average => "average",
            Self::Complex => "complex",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "simple" => Some(Self::Simple),
            "average" => Some(Self::Average),
            "complex" => Some(Self::Complex),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Classification result. The `(class, level)` pair selects the downstream
/// planning template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifyData {
    pub output: String,
    #[serde(rename = "type")]
    pub issue_class: IssueClass,
    pub level: Complexity,
}

impl ClassifyData {
    /// Slash-command template for the planning step, e.g. `/adw-feature-plan`.
    pub fn plan_command(&self) -> String {
        format!("/adw-{}-plan", self.issue_class.as_str())
    }

    /// Model tier for planning: heavyweight issues get the larger model.
    pub fn plan_model(&self) -> &'static str {
        match self.level {
            Complexity::Complex | Complexity::Critical => "opus",
            Complexity::Simple | Complexity::Average => "sonnet",
        }
    }
}

/// Plan output shared by plan and patch-plan steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanData {
    pub output: String,
    pub plan: String,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImplementStatus {
    Success,
    Partial,
    Failed,
}

/// Implementation result reported by the implement agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementData {
    pub files_modified: Vec<String>,
    pub git_diff_stat: String,
    pub output: String,
    pub status: ImplementStatus,
    pub summary: String,
}

/// One quality tool invocation reported by the code-quality agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityTool {
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// One planned commit in the PR metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPlan {
    pub message: String,
    #[serde(default)]
    pub files: Vec<String>,
}

/// Artifact payloads, tagged on disk by `artifact_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "artifact_type", rename_all = "kebab-case")]
pub enum ArtifactPayload {
    GitSetup {
        branch: String,
        base_branch: String,
        reset_performed: bool,
    },
    FetchIssue {
        issue: Issue,
    },
    FetchPatch {
        issue: Issue,
    },
    Classify {
        classify: ClassifyData,
    },
    Plan {
        plan: PlanData,
    },
    PatchPlan {
        plan: PlanData,
    },
    Implement {
        implement: ImplementData,
    },
    CodeReview {
        review_text: String,
    },
    ReviewFix {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    CodeQuality {
        output: String,
        tools: Vec<QualityTool>,
    },
    Acceptance {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    PatchAcceptance {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    ComposeRequest {
        title: String,
        summary: String,
        #[serde(default)]
        commits: Vec<CommitPlan>,
    },
    GhPullRequest {
        url: String,
        #[serde(default)]
        existing: bool,
    },
    GlabPullRequest {
        url: String,
        #[serde(default)]
        existing: bool,
    },
    ComposeCommits {
        output: String,
        pushed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pr_url: Option<String>,
    },
}

impl ArtifactPayload {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::GitSetup { .. } => ArtifactKind::GitSetup,
            Self::FetchIssue { .. } => ArtifactKind::FetchIssue,
            Self::FetchPatch { .. } => ArtifactKind::FetchPatch,
            Self::Classify { .. } => ArtifactKind::Classify,
            Self::Plan { .. } => ArtifactKind::Plan,
            Self::PatchPlan { .. } => ArtifactKind::PatchPlan,
            Self::Implement { .. } => ArtifactKind::Implement,
            Self::CodeReview { .. } => ArtifactKind::CodeReview,
            Self::ReviewFix { .. } => ArtifactKind::ReviewFix,
            Self::CodeQuality { .. } => ArtifactKind::CodeQuality,
            Self::Acceptance { .. } => ArtifactKind::Acceptance,
            Self::PatchAcceptance { .. } => ArtifactKind::PatchAcceptance,
            Self::ComposeRequest { .. } => ArtifactKind::ComposeRequest,
            Self::GhPullRequest { .. } => ArtifactKind::GhPullRequest,
            Self::GlabPullRequest { .. } => ArtifactKind::GlabPullRequest,
            Self::ComposeCommits { .. } => ArtifactKind::ComposeCommits,
        }
    }
}

/// A persisted artifact: payload plus workflow identity and creation stamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub workflow_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: ArtifactPayload,
}

impl Artifact {
    pub fn new(workflow_id: &AdwId, payload: ArtifactPayload) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            created_at: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.payload.kind()
    }
}

/// Metadata about an artifact file, without loading it.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactInfo {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Filesystem-backed store for one workflow's artifacts.
///
/// Exactly one process writes to a store at a time (the pipeline run);
/// concurrent readers are safe because writes go through a rename.
#[derive(Debug)]
pub struct ArtifactStore {
    workflow_id: AdwId,
    parent_workflow_id: Option<AdwId>,
    workflow_dir: PathBuf,
    parent_dir: Option<PathBuf>,
}

impl ArtifactStore {
    /// Open (creating if necessary) the artifact directory for a workflow.
    ///
    /// The directory is created with mode `0700`. When `parent_workflow_id`
    /// is given, its directory must already exist; a patch run without its
    /// parent's artifacts cannot make progress.
    pub fn open(
        base_dir: &Path,
        workflow_id: AdwId,
        parent_workflow_id: Option<AdwId>,
    ) -> Result<Self> {
        let parent_dir = match &parent_workflow_id {
            Some(parent) => {
                let dir = base_dir.join(parent.as_ref());
                if !dir.is_dir() {
                    return Err(ArtifactError::ParentNotFound(dir));
                }
                Some(dir)
            }
            None => None,
        };

        let workflow_dir = base_dir.join(workflow_id.as_ref());
        create_private_dir(&workflow_dir)?;

        Ok(Self {
            workflow_id,
            parent_workflow_id,
            workflow_dir,
            parent_dir,
        })
    }

    pub fn workflow_id(&self) -> &AdwId {
        &self.workflow_id
    }

    pub fn parent_workflow_id(&self) -> Option<&AdwId> {
        self.parent_workflow_id.as_ref()
    }

    pub fn workflow_dir(&self) -> &Path {
        &self.workflow_dir
    }

    fn artifact_path(&self, kind: ArtifactKind) -> PathBuf {
        self.workflow_dir.join(kind.file_name())
    }

    /// Persist an artifact, overwriting any previous file of the same kind.
    ///
    /// The JSON is written to a temp file in the workflow directory and
    /// renamed into place so concurrent readers never observe a torn write.
    pub fn write(&self, artifact: &Artifact) -> Result<()> {
        let kind = artifact.kind();
        if self.workflow_id.is_patch() && kind.is_shared() {
            warn!(
                workflow_id = %self.workflow_id,
                kind = %kind,
                "patch workflow is writing a shared artifact kind; shared \
                 artifacts are normally read from the parent workflow"
            );
        }

        let path = self.artifact_path(kind);
        let tmp_path = self.workflow_dir.join(format!(".{}.tmp", kind.file_name()));

        let json = serde_json::to_string_pretty(artifact).map_err(|source| {
            ArtifactError::Corrupted { kind, source }
        })?;
        fs::write(&tmp_path, json.as_bytes())?;
        fs::rename(&tmp_path, &path)?;

        debug!(workflow_id = %self.workflow_id, kind = %kind, path = %path.display(), "wrote artifact");
        Ok(())
    }

    /// Read an artifact of the given kind.
    ///
    /// Resolution: local file wins; on a local miss a shared kind falls back
    /// to the parent workflow directory when one is declared; a local miss on
    /// any other kind is not-found even if the parent has the file.
    pub fn read(&self, kind: ArtifactKind) -> Result<Artifact> {
        let local = self.artifact_path(kind);
        let path = if local.exists() {
            local
        } else if kind.is_shared() {
            match &self.parent_dir {
                Some(parent_dir) => {
                    let parent_path = parent_dir.join(kind.file_name());
                    if parent_path.exists() {
                        info!(
                            workflow_id = %self.workflow_id,
                            parent = ?self.parent_workflow_id,
                            kind = %kind,
                            "artifact missing locally, falling back to parent workflow"
                        );
                        parent_path
                    } else {
                        return Err(ArtifactError::NotFound(kind));
                    }
                }
                None => return Err(ArtifactError::NotFound(kind)),
            }
        } else {
            return Err(ArtifactError::NotFound(kind));
        };

        let data = fs::read_to_string(&path)?;
        let artifact: Artifact = serde_json::from_str(&data)
            .map_err(|source| ArtifactError::Corrupted { kind, source })?;

        if artifact.kind() != kind {
            return Err(ArtifactError::KindMismatch {
                path,
                expected: kind,
                found: artifact.kind(),
            });
        }
        Ok(artifact)
    }

    /// Whether the artifact exists in the local workflow directory.
    /// Never consults the parent.
    pub fn exists(&self, kind: ArtifactKind) -> bool {
        self.artifact_path(kind).exists()
    }

    /// Enumerate locally present artifact kinds by filesystem presence.
    pub fn list(&self) -> Vec<ArtifactKind> {
        ALL_ARTIFACT_KINDS
            .iter()
            .copied()
            .filter(|kind| self.exists(*kind))
            .collect()
    }

    /// Delete a local artifact file. Returns whether a file was removed.
    pub fn delete(&self, kind: ArtifactKind) -> Result<bool> {
        let path = self.artifact_path(kind);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        debug!(workflow_id = %self.workflow_id, kind = %kind, "deleted artifact");
        Ok(true)
    }

    /// File metadata for a local artifact, or `None` when absent.
    pub fn info(&self, kind: ArtifactKind) -> Option<ArtifactInfo> {
        let path = self.artifact_path(kind);
        let meta = fs::metadata(&path).ok()?;
        let modified_at = meta
            .modified()
            .ok()
            .map(DateTime::<Utc>::from);
        Some(ArtifactInfo {
            kind,
            path,
            size_bytes: meta.len(),
            modified_at,
        })
    }

    /// Whether the local directory holds at least one artifact file.
    pub fn has_any_artifacts(&self) -> bool {
        !self.list().is_empty()
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}
