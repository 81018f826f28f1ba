//! HTTP client for the shared issue store.
//!
//! The store is a Postgres instance fronted by a PostgREST-style API
//! (Supabase). Issue claiming goes through the `get_and_lock_next_issue`
//! RPC, which locks server-side with `FOR UPDATE SKIP LOCKED` so concurrent
//! workers never claim the same row.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::{ENV_SUPABASE_KEY, ENV_SUPABASE_URL};
use crate::types::{Comment, Issue, IssueStatus, IssueType, ModelError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("missing required environment variable: {0}")]
    MissingConfig(&'static str),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("issue store returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("issue not found: {0}")]
    IssueNotFound(i64),
    #[error("invalid issue record: {0}")]
    Model(#[from] ModelError),
    #[error("unexpected response shape: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// One row returned by the `get_and_lock_next_issue` RPC.
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimedIssue {
    pub issue_id: i64,
    pub issue_description: String,
    pub issue_status: IssueStatus,
    pub issue_type: IssueType,
}

#[derive(Debug, Serialize)]
struct ClaimParams<'a> {
    p_worker_id: &'a str,
}

/// Client over the issue store's REST surface.
#[derive(Debug, Clone)]
pub struct IssueStore {
    http: reqwest::Client,
    base_url: String,
}

impl IssueStore {
    /// Build a client from `SUPABASE_URL` and `SUPABASE_SERVICE_ROLE_KEY`.
    ///
    /// Missing credentials are a fatal configuration error; callers at
    /// process startup are expected to exit on it.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var(ENV_SUPABASE_URL)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(StoreError::MissingConfig(ENV_SUPABASE_URL))?;
        let key = std::env::var(ENV_SUPABASE_KEY)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(StoreError::MissingConfig(ENV_SUPABASE_KEY))?;
        Self::new(url.trim(), key.trim())
    }

    pub fn new(base_url: &str, service_key: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {service_key}"))
            .map_err(|_| StoreError::InvalidResponse("service key is not header-safe".into()))?;
        let apikey = HeaderValue::from_str(service_key)
            .map_err(|_| StoreError::InvalidResponse("service key is not header-safe".into()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert("apikey", apikey);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{path}", self.base_url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(StoreError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Atomically claim the next queued issue assigned to this worker.
    ///
    /// Returns `None` when every eligible row is locked or the queue is
    /// empty, which is the worker's natural backpressure signal.
    pub async fn claim_next_issue(&self, worker_id: &str) -> Result<Option<ClaimedIssue>> {
        debug!(worker_id, "claiming next issue");
        let response = self
            .http
            .post(self.rest_url("rpc/get_and_lock_next_issue"))
            .json(&ClaimParams {
                p_worker_id: worker_id,
            })
            .send()
            .await?;
        let rows: Vec<ClaimedIssue> = Self::check(response).await?.json().await?;
        Ok(rows.into_iter().next())
    }

    /// Fetch one issue by id, normalising legacy statuses and trimming text.
    pub async fn fetch_issue(&self, issue_id: i64) -> Result<Issue> {
        let response = self
            .http
            .get(self.rest_url("issues"))
            .query(&[("id", format!("eq.{issue_id}")), ("select", "*".to_string())])
            .send()
            .await?;
        let rows: Vec<Issue> = Self::check(response).await?.json().await?;
        let issue = rows
            .into_iter()
            .next()
            .ok_or(StoreError::IssueNotFound(issue_id))?;
        Ok(issue.normalize()?)
    }

    async fn patch_issue(&self, issue_id: i64, body: serde_json::Value) -> Result<()> {
        let response = self
            .http
            .patch(self.rest_url("issues"))
            .query(&[("id", format!("eq.{issue_id}"))])
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Set the issue status column (last-writer-wins).
    pub async fn update_issue_status(&self, issue_id: i64, status: IssueStatus) -> Result<()> {
        debug!(issue_id, status = status.as_str(), "updating issue status");
        self.patch_issue(issue_id, serde_json::json!({ "status": status.as_str() }))
            .await
    }

    /// Record the VCS branch created for this issue's workflow.
    pub async fn update_issue_branch(&self, issue_id: i64, branch: &str) -> Result<()> {
        self.patch_issue(issue_id, serde_json::json!({ "branch": branch }))
            .await
    }

    /// Record the workflow id currently processing this issue.
    pub async fn update_issue_adw_id(&self, issue_id: i64, adw_id: &str) -> Result<()> {
        self.patch_issue(issue_id, serde_json::json!({ "adw_id": adw_id }))
            .await
    }

    /// Cheap connectivity probe: select a single issue id.
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .http
            .get(self.rest_url("issues"))
            .query(&[("select", "id"), ("limit", "1")])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Append a comment row to the issue's log.
    pub async fn insert_comment(&self, comment: &Comment) -> Result<()> {
        let response = self
            .http
            .post(self.rest_url("comments"))
            .json(comment)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claimed_issue_deserializes_rpc_row() {
        let row: ClaimedIssue = serde_json::from_str(
            r#"{
                "issue_id": 7,
                "issue_description": "Apply hotfix",
                "issue_status": "started",
                "issue_type": "patch"
            }"#,
        )
        .unwrap();
        assert_eq!(row.issue_id, 7);
        assert_eq!(row.issue_status, IssueStatus::Started);
        assert_eq!(row.issue_type, IssueType::Patch);
    }

    #[test]
    fn claimed_issue_normalises_legacy_status() {
        let row: ClaimedIssue = serde_json::from_str(
            r#"{
                "issue_id": 9,
                "issue_description": "legacy row",
                "issue_status": "patch pending",
                "issue_type": "main"
            }"#,
        )
        .unwrap();
        assert_eq!(row.issue_status, IssueStatus::Pending);
    }

    #[test]
    fn client_construction_trims_trailing_slash() {
        let store = IssueStore::new("https://db.example.com/", "key").unwrap();
        assert_eq!(store.rest_url("issues"), "https://db.example.com/rest/v1/issues");
    }
}
