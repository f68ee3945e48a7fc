use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use url::Url;

use crate::error::{PipeLensError, Result};

use super::types::{IssueComment, PullRequest, RawComment};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_SECONDS: u64 = 10;
const MAX_CONCURRENT_REQUESTS: usize = 8;
pub(super) const PAGE_SIZE: usize = 100;
const SUMMARY_MARKER: &str = "pipeline summary";

/// Minimal GitHub REST client for pull requests and their comments.
pub struct GitHubClient {
    client: Client,
    base_url: Url,
    repository: String,
    token: Option<String>,
    retry_delay: Duration,
    semaphore: Arc<Semaphore>,
}

impl GitHubClient {
    /// Creates a client for one repository.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root, e.g. `https://api.github.com` or a GitHub
    ///   Enterprise `https://host/api/v3`
    /// * `repository` - Repository in `owner/name` form
    /// * `token` - Optional personal access token sent as a bearer token
    ///
    /// # Errors
    ///
    /// Returns an error if the repository path or base URL is invalid, or
    /// the HTTP client cannot be built.
    pub fn new(base_url: &str, repository: &str, token: Option<String>) -> Result<Self> {
        let parts: Vec<&str> = repository.split('/').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(PipeLensError::Config(format!(
                "Repository must be in format 'owner/repo', got '{repository}'"
            )));
        }

        let client = Client::builder()
            .user_agent(concat!("pipelens/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipeLensError::Config(format!("Failed to create HTTP client: {e}")))?;

        // Url::join drops the last path segment unless the base ends with '/'
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|e| PipeLensError::Config(format!("Invalid base URL: {e}")))?;

        Ok(Self {
            client,
            base_url,
            repository: repository.to_string(),
            token,
            retry_delay: Duration::from_secs(RETRY_DELAY_SECONDS),
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
        })
    }

    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(&format!("repos/{}/{path}", self.repository))
            .map_err(|e| PipeLensError::Config(format!("Invalid API URL: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    /// GET with retries on network errors, rate limiting and server errors.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| PipeLensError::Api(format!("Request limiter closed: {e}")))?;

        let mut retry_count = 0;
        loop {
            let mut request = self
                .client
                .get(url.clone())
                .header("Accept", "application/vnd.github+json");
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            debug!("GET {url}");
            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    if retry_count >= MAX_RETRIES {
                        return Err(e.into());
                    }
                    warn!(
                        "Network error ({e}), retrying in {}s ({}/{MAX_RETRIES})...",
                        self.retry_delay.as_secs(),
                        retry_count + 1
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                if retry_count >= MAX_RETRIES {
                    return Err(PipeLensError::ApiErrorAfterRetries {
                        status: status.as_u16(),
                        retries: MAX_RETRIES,
                    });
                }
                warn!(
                    "GitHub API error (status {status}). Waiting {}s before retry {}/{MAX_RETRIES}...",
                    self.retry_delay.as_secs(),
                    retry_count + 1
                );
                tokio::time::sleep(self.retry_delay).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error response".to_string());
                return Err(PipeLensError::ApiError {
                    status: status.as_u16(),
                    message,
                });
            }

            return Ok(response.json().await?);
        }
    }

    /// Fetches a single pull request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the PR does not exist.
    pub async fn fetch_pull(&self, pr_number: u64) -> Result<PullRequest> {
        let url = self.endpoint(&format!("pulls/{pr_number}"), &[])?;
        self.get_json(url).await
    }

    /// Fetches every issue comment of a PR, following pagination.
    ///
    /// # Errors
    ///
    /// Returns an error if any page cannot be fetched.
    pub async fn fetch_pr_comments(
        &self,
        pr_number: u64,
        pr_url: Option<&str>,
    ) -> Result<Vec<RawComment>> {
        let mut comments = Vec::new();
        let mut page = 1;

        loop {
            let url = self.endpoint(
                &format!("issues/{pr_number}/comments"),
                &[
                    ("per_page", PAGE_SIZE.to_string()),
                    ("page", page.to_string()),
                ],
            )?;
            let batch: Vec<IssueComment> = self.get_json(url).await?;
            let batch_len = batch.len();

            comments.extend(batch.into_iter().map(|c| RawComment {
                body: c.body.unwrap_or_default(),
                repository: self.repository.clone(),
                pr_number,
                pr_url: pr_url.map(str::to_string),
                comment_id: Some(c.id),
                created_at: c.created_at,
            }));

            if batch_len < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        debug!("PR #{pr_number}: {} comments", comments.len());
        Ok(comments)
    }

    /// Lists recently updated PRs, most recently updated first.
    ///
    /// At most `max_prs` PRs are listed from the API; of those, up to `limit`
    /// updated within the last `days_back` days are returned.
    ///
    /// # Errors
    ///
    /// Returns an error if a listing page cannot be fetched.
    pub async fn fetch_recent_prs(
        &self,
        limit: usize,
        days_back: u32,
        max_prs: usize,
    ) -> Result<Vec<PullRequest>> {
        let cutoff = cutoff(days_back);
        let mut recent = Vec::new();
        let mut listed = 0;
        let mut page = 1;

        'pages: while listed < max_prs && recent.len() < limit {
            let url = self.endpoint(
                "pulls",
                &[
                    ("state", "all".to_string()),
                    ("sort", "updated".to_string()),
                    ("direction", "desc".to_string()),
                    ("per_page", PAGE_SIZE.to_string()),
                    ("page", page.to_string()),
                ],
            )?;
            let batch: Vec<PullRequest> = self.get_json(url).await?;
            let batch_len = batch.len();

            for pr in batch {
                listed += 1;
                if pr.updated_at < cutoff {
                    // sorted by update time, nothing newer follows
                    break 'pages;
                }
                recent.push(pr);
                if listed >= max_prs || recent.len() >= limit {
                    break 'pages;
                }
            }

            if batch_len < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        info!(
            "Found {} PRs updated in the last {days_back} days ({listed} listed)",
            recent.len()
        );
        Ok(recent)
    }

    /// Collects comments that look like pipeline summaries from recent PRs.
    ///
    /// PR comments are fetched concurrently. A PR whose comments cannot be
    /// fetched is logged and skipped. Only comments created within the
    /// `days_back` window are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the PR listing itself fails.
    pub async fn search_pipeline_comments(
        &self,
        limit: usize,
        days_back: u32,
        max_prs: usize,
    ) -> Result<Vec<RawComment>> {
        let prs = self.fetch_recent_prs(limit, days_back, max_prs).await?;
        let cutoff = cutoff(days_back);

        let results = join_all(
            prs.iter()
                .map(|pr| self.fetch_pr_comments(pr.number, Some(pr.html_url.as_str()))),
        )
        .await;

        let mut comments = Vec::new();
        for (pr, result) in prs.iter().zip(results) {
            match result {
                Ok(pr_comments) => comments.extend(
                    pr_comments
                        .into_iter()
                        .filter(|c| c.created_at >= cutoff && mentions_summary(&c.body)),
                ),
                Err(e) => warn!("Skipping PR #{}: {e}", pr.number),
            }
        }

        comments.sort_by_key(|c| c.created_at);
        info!("Found {} pipeline summary comments", comments.len());
        Ok(comments)
    }

    /// Collects pipeline summary comments of a single PR.
    ///
    /// # Errors
    ///
    /// Returns an error if the PR or its comments cannot be fetched.
    pub async fn pr_pipeline_comments(&self, pr_number: u64) -> Result<Vec<RawComment>> {
        let pr = self.fetch_pull(pr_number).await?;
        let comments = self
            .fetch_pr_comments(pr.number, Some(pr.html_url.as_str()))
            .await?;
        Ok(comments
            .into_iter()
            .filter(|c| mentions_summary(&c.body))
            .collect())
    }
}

fn cutoff(days_back: u32) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::days(i64::from(days_back))
}

fn mentions_summary(body: &str) -> bool {
    body.to_lowercase().contains(SUMMARY_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client(server: &Server) -> GitHubClient {
        GitHubClient::new(&server.url(), "org/repo", Some("test-token".to_string()))
            .unwrap()
            .with_retry_delay(Duration::from_millis(1))
    }

    fn iso(days_ago: i64) -> String {
        (Utc::now() - chrono::Duration::days(days_ago)).to_rfc3339()
    }

    #[test]
    fn test_client_rejects_invalid_repository() {
        for repo in ["invalid-path", "owner/repo/extra", "/repo"] {
            let result = GitHubClient::new("https://api.github.com", repo, None);
            assert!(result.is_err(), "Should reject '{repo}'");
            assert!(result.err().unwrap().to_string().contains("owner/repo"));
        }
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client =
            GitHubClient::new("https://ghe.example.com/api/v3", "org/repo", None).unwrap();
        let url = client.endpoint("pulls", &[("page", "2".to_string())]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://ghe.example.com/api/v3/repos/org/repo/pulls?page=2"
        );
    }

    #[tokio::test]
    async fn test_fetch_pr_comments_follows_pages() {
        let mut server = Server::new_async().await;

        let full_page: Vec<serde_json::Value> = (0..PAGE_SIZE)
            .map(|i| {
                serde_json::json!({
                    "id": i,
                    "body": "hello",
                    "created_at": "2024-05-02T10:00:00Z"
                })
            })
            .collect();
        let page_one = server
            .mock("GET", "/repos/org/repo/issues/7/comments")
            .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_body(serde_json::to_string(&full_page).unwrap())
            .create_async()
            .await;
        let page_two = server
            .mock("GET", "/repos/org/repo/issues/7/comments")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_body(r#"[{"id": 999, "body": null, "created_at": "2024-05-02T11:00:00Z"}]"#)
            .create_async()
            .await;

        let comments = client(&server)
            .fetch_pr_comments(7, Some("https://github.com/org/repo/pull/7"))
            .await
            .unwrap();

        page_one.assert_async().await;
        page_two.assert_async().await;
        assert_eq!(comments.len(), PAGE_SIZE + 1);
        let last = comments.last().unwrap();
        assert_eq!(last.comment_id, Some(999));
        assert_eq!(last.body, "", "Should treat a null body as empty");
        assert_eq!(last.repository, "org/repo");
        assert_eq!(last.pr_number, 7);
    }

    #[tokio::test]
    async fn test_recent_prs_stop_at_cutoff_and_limit() {
        let mut server = Server::new_async().await;
        let body = serde_json::json!([
            {"number": 3, "html_url": "https://github.com/org/repo/pull/3", "updated_at": iso(1)},
            {"number": 2, "html_url": "https://github.com/org/repo/pull/2", "updated_at": iso(2)},
            {"number": 1, "html_url": "https://github.com/org/repo/pull/1", "updated_at": iso(40)}
        ]);
        let _mock = server
            .mock("GET", "/repos/org/repo/pulls")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let client = client(&server);
        let within_window = client.fetch_recent_prs(10, 30, 500).await.unwrap();
        let numbers: Vec<u64> = within_window.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![3, 2]);

        let limited = client.fetch_recent_prs(1, 30, 500).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_search_keeps_only_summaries_and_skips_failing_prs() {
        let mut server = Server::new_async().await;
        let prs = serde_json::json!([
            {"number": 5, "html_url": "https://github.com/org/repo/pull/5", "updated_at": iso(1)},
            {"number": 6, "html_url": "https://github.com/org/repo/pull/6", "updated_at": iso(1)}
        ]);
        let _list = server
            .mock("GET", "/repos/org/repo/pulls")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(prs.to_string())
            .create_async()
            .await;
        let comments = serde_json::json!([
            {"id": 1, "body": "# Pipeline Summary\n- build: ✅", "created_at": iso(1)},
            {"id": 2, "body": "LGTM", "created_at": iso(1)},
            {"id": 3, "body": "## pipeline summary\n- old: ✅", "created_at": iso(90)}
        ]);
        let _pr5 = server
            .mock("GET", "/repos/org/repo/issues/5/comments")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(comments.to_string())
            .create_async()
            .await;
        let _pr6 = server
            .mock("GET", "/repos/org/repo/issues/6/comments")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"message": "Not Found"}"#)
            .create_async()
            .await;

        let found = client(&server)
            .search_pipeline_comments(10, 30, 500)
            .await
            .unwrap();

        assert_eq!(found.len(), 1, "Should keep only recent summary comments");
        assert_eq!(found[0].comment_id, Some(1));
        assert_eq!(
            found[0].pr_url.as_deref(),
            Some("https://github.com/org/repo/pull/5")
        );
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_reported() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/org/repo/pulls/1")
            .with_status(502)
            .expect((MAX_RETRIES + 1) as usize)
            .create_async()
            .await;

        let result = client(&server).fetch_pull(1).await;

        mock.assert_async().await;
        assert!(matches!(
            result,
            Err(PipeLensError::ApiErrorAfterRetries { status: 502, .. })
        ));
    }
}
