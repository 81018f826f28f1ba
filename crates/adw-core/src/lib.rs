pub mod artifacts;
pub mod config;
pub mod db;
pub mod json_parser;
pub mod paths;
pub mod schemas;
pub mod types;

pub use artifacts::{
    Artifact, ArtifactError, ArtifactInfo, ArtifactKind, ArtifactPayload, ArtifactStore,
    ClassifyData, CommitPlan, Complexity, ImplementData, ImplementStatus, IssueClass, PlanData,
    QualityTool, ALL_ARTIFACT_KINDS,
};
pub use db::{ClaimedIssue, IssueStore, StoreError};
pub use json_parser::{parse_and_validate_json, sanitize_json_output, FieldType, ParseResult};
pub use types::{
    AdwId, Comment, CommentSource, Issue, IssueStatus, IssueType, ModelError, Platform,
    WorkflowKind, PATCH_SUFFIX,
};
