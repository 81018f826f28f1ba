//! Core data model for the ADW orchestrator.
//!
//! Issue and comment records mirror the rows in the shared issue store;
//! workflow identifiers carry the `-patch` suffix convention that links a
//! patch run to its parent run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Suffix that marks a workflow id as a patch run of a parent workflow.
pub const PATCH_SUFFIX: &str = "-patch";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("description must be non-empty after trimming")]
    EmptyDescription,
    #[error("comment text must be non-empty after trimming")]
    EmptyComment,
    #[error("unknown worker id: {0}")]
    UnknownWorkerId(String),
}

/// Identifier of a single workflow run (one pipeline execution for one issue).
///
/// Patch workflows reuse the parent id with a `-patch` suffix so their
/// artifact store can resolve shared artifacts from the parent directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdwId(pub String);

impl AdwId {
    /// Generate a fresh workflow id (`adw-` + time-ordered short UUID).
    pub fn generate() -> Self {
        let uuid = Uuid::now_v7().simple().to_string();
        Self(format!("adw-{}", &uuid[..12]))
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Whether this id denotes a patch workflow.
    pub fn is_patch(&self) -> bool {
        self.0.ends_with(PATCH_SUFFIX)
    }

    /// Parent workflow id, if this is a patch workflow.
    pub fn parent(&self) -> Option<AdwId> {
        self.0
            .strip_suffix(PATCH_SUFFIX)
            .map(|p| AdwId(p.to_string()))
    }

    /// Derive the patch workflow id for this (parent) workflow.
    pub fn patch_child(&self) -> AdwId {
        AdwId(format!("{}{}", self.0, PATCH_SUFFIX))
    }
}

impl std::fmt::Display for AdwId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for AdwId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Issue lifecycle status.
///
/// The canonical set is `pending → started → {completed, failed}` with
/// `failed → pending` permitted for requeue. Legacy rows may still carry
/// `patch pending` / `patched`; those normalise on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    #[serde(alias = "patch pending")]
    Pending,
    Started,
    #[serde(alias = "patched")]
    Completed,
    Failed,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Issue kind: a primary issue or a follow-up patch against one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueType {
    #[default]
    Main,
    Patch,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Patch => "patch",
        }
    }
}

/// Closed enumeration of worker instance identifiers.
pub const VALID_WORKER_IDS: [&str; 15] = [
    "alleycat-1",
    "alleycat-2",
    "alleycat-3",
    "executor-1",
    "executor-2",
    "executor-3",
    "local-1",
    "local-2",
    "local-3",
    "tydirium-1",
    "tydirium-2",
    "tydirium-3",
    "xwing-1",
    "xwing-2",
    "xwing-3",
];

/// Validate a worker id against the closed enumeration.
pub fn validate_worker_id(worker_id: &str) -> Result<(), ModelError> {
    if VALID_WORKER_IDS.contains(&worker_id) {
        Ok(())
    } else {
        Err(ModelError::UnknownWorkerId(worker_id.to_string()))
    }
}

/// An issue record from the shared store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    pub description: String,
    #[serde(default = "default_status")]
    pub status: IssueStatus,
    #[serde(default, rename = "type")]
    pub issue_type: IssueType,
    #[serde(default)]
    pub adw_id: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_status() -> IssueStatus {
    IssueStatus::Pending
}

impl Issue {
    /// Trim free-text fields and reject an empty description.
    ///
    /// Applied to every issue deserialized from the store before it enters
    /// the pipeline.
    pub fn normalize(mut self) -> Result<Self, ModelError> {
        self.description = self.description.trim().to_string();
        if self.description.is_empty() {
            return Err(ModelError::EmptyDescription);
        }
        self.adw_id = self
            .adw_id
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        self.branch = self
            .branch
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        Ok(self)
    }
}

/// Provenance of a comment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentSource {
    #[default]
    System,
    Agent,
    Artifact,
}

impl CommentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Agent => "agent",
            Self::Artifact => "artifact",
        }
    }
}

/// Append-only progress row attached to an issue.
///
/// The `(source, kind)` pair is informative only and never enforced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub issue_id: i64,
    pub comment: String,
    #[serde(default)]
    pub raw: serde_json::Value,
    pub source: CommentSource,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adw_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Comment {
    /// Build a comment, trimming the text and rejecting empty bodies.
    pub fn new(
        issue_id: i64,
        text: impl Into<String>,
        raw: serde_json::Value,
        source: CommentSource,
        kind: impl Into<String>,
        adw_id: Option<String>,
    ) -> Result<Self, ModelError> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(ModelError::EmptyComment);
        }
        Ok(Self {
            id: None,
            issue_id,
            comment: text,
            raw,
            source,
            kind: kind.into(),
            adw_id,
            created_at: None,
        })
    }
}

/// Pipeline flavours selectable by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    #[default]
    Main,
    Patch,
    Codereview,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Patch => "patch",
            Self::Codereview => "codereview",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "main" => Some(Self::Main),
            "patch" => Some(Self::Patch),
            "codereview" => Some(Self::Codereview),
            _ => None,
        }
    }
}

/// DevSecOps platform selector for PR creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Github,
    Gitlab,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitlab => "gitlab",
        }
    }

    /// Parse the `DEV_SEC_OPS_PLATFORM` value; unknown or empty selects none.
    pub fn from_env_value(value: Option<&str>) -> Option<Self> {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("github") => Some(Self::Github),
            Some("gitlab") => Some(Self::Gitlab),
            _ => None,
        }
    }
}
