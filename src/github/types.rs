use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ReportMetadata;

/// A PR comment together with where it was found.
///
/// This is also the record format of `ingest --from-file`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawComment {
    pub body: String,
    /// Repository in `owner/name` form
    pub repository: String,
    pub pr_number: u64,
    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub comment_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl RawComment {
    pub fn metadata(&self) -> ReportMetadata {
        ReportMetadata {
            repository: self.repository.clone(),
            pr_number: self.pr_number,
            observed_at: self.created_at,
            run_id: None,
            pr_url: self.pr_url.clone(),
            comment_id: self.comment_id,
        }
    }
}

/// Issue comment as returned by `GET /repos/{owner}/{repo}/issues/{n}/comments`.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueComment {
    pub id: u64,
    #[serde(default)]
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Pull request as returned by `GET /repos/{owner}/{repo}/pulls`.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
    pub updated_at: DateTime<Utc>,
}
