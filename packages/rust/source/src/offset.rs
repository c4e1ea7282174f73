//! Offset-paginated REST search transport.
//!
//! Fallback for when the cursor transport is throttled. Searches PRs the
//! identity commented on, page by page, then fetches each PR's review
//! comments with one sub-request. A failing sub-request skips that PR
//! rather than aborting the page.

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use reviewharvest_shared::{Comment, HarvestError, Identity, Position, Result};

use crate::{
    REQUEST_TIMEOUT_SECS, SourceAdapter, SourceError, SourcePage, SourceResult, USER_AGENT,
    classify_send_error, classify_status,
};

/// PRs per search page.
const PER_PAGE: u32 = 30;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    total_count: u64,
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    number: u64,
    title: String,
    pull_request: Option<PullRequestRef>,
}

#[derive(Debug, Deserialize)]
struct PullRequestRef {
    url: String,
}

#[derive(Debug, Deserialize)]
struct RestComment {
    body: Option<String>,
    path: Option<String>,
    position: Option<i64>,
    diff_hunk: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    html_url: String,
    user: Option<RestUser>,
}

#[derive(Debug, Deserialize)]
struct RestUser {
    login: String,
}

/// Extract "owner/name" from a PR API URL (`.../repos/{owner}/{name}/pulls/{n}`).
fn repo_from_pr_url(pr_url: &str) -> Option<String> {
    let tail = pr_url.split("/repos/").nth(1)?;
    let mut segments = tail.split('/');
    let owner = segments.next()?;
    let name = segments.next()?;
    Some(format!("{owner}/{name}"))
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// REST transport using numbered search pages.
pub struct OffsetAdapter {
    client: Client,
    rest_base: Url,
    token: String,
}

impl OffsetAdapter {
    /// Create an adapter against the given REST API base URL.
    pub fn new(rest_base: &str, token: impl Into<String>) -> Result<Self> {
        let rest_base = Url::parse(rest_base)
            .map_err(|e| HarvestError::config(format!("invalid REST base URL: {e}")))?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            rest_base,
            token: token.into(),
        })
    }

    /// Search PRs the identity commented on. Throttling propagates; other
    /// failures are page-level errors.
    async fn search_page(&self, identity: &Identity, page: u32) -> SourceResult<SearchResponse> {
        let url = self
            .rest_base
            .join("search/issues")
            .map_err(|e| SourceError::Fatal(format!("bad search URL: {e}")))?;

        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.token)
            .header("accept", "application/vnd.github.v3+json")
            .query(&[
                ("q", format!("commenter:{identity} type:pr")),
                ("page", page.to_string()),
                ("per_page", PER_PAGE.to_string()),
            ])
            .send()
            .await
            .map_err(|e| classify_send_error(url.as_str(), e))?;

        if !response.status().is_success() {
            return Err(classify_status(&response));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Transient(format!("search body: {e}")))
    }

    /// Fetch one PR's review comments. Throttling propagates so the
    /// caller can stop; anything else is a per-record failure.
    async fn pr_comments(&self, pr_api_url: &str) -> SourceResult<Vec<RestComment>> {
        let url = format!("{pr_api_url}/comments");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header("accept", "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|e| classify_send_error(&url, e))?;

        if !response.status().is_success() {
            return Err(classify_status(&response));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Transient(format!("comments body: {e}")))
    }
}

#[async_trait::async_trait]
impl SourceAdapter for OffsetAdapter {
    fn name(&self) -> &'static str {
        "offset"
    }

    fn initial_position(&self) -> Position {
        Position::Offset { page: 1 }
    }

    async fn fetch_page(
        &self,
        identity: &Identity,
        position: &Position,
    ) -> SourceResult<SourcePage> {
        let Position::Offset { page } = position else {
            return Err(SourceError::Fatal(
                "offset transport received a cursor position".into(),
            ));
        };

        let search = self.search_page(identity, *page).await?;
        let mut comments = Vec::new();

        for item in &search.items {
            let Some(pr) = &item.pull_request else {
                debug!(number = item.number, "search hit is not a PR, skipping");
                continue;
            };

            let Some(repo) = repo_from_pr_url(&pr.url) else {
                warn!(url = %pr.url, "unparseable PR URL, skipping");
                continue;
            };

            // One sub-request per PR. A single failing PR must not abort
            // the page; throttling still propagates to trigger failover.
            let pr_comments = match self.pr_comments(&pr.url).await {
                Ok(c) => c,
                Err(SourceError::Throttled { retry_after_secs }) => {
                    return Err(SourceError::Throttled { retry_after_secs });
                }
                Err(e) => {
                    warn!(%repo, pr = item.number, error = %e, "skipping PR comments");
                    continue;
                }
            };

            for node in pr_comments {
                let Some(user) = &node.user else {
                    debug!(url = %node.html_url, "comment has no user, skipping");
                    continue;
                };
                if !identity.matches_login(&user.login) {
                    continue;
                }
                let Some(body) = node.body.filter(|b| !b.is_empty()) else {
                    debug!(url = %node.html_url, "comment has empty body, skipping");
                    continue;
                };
                comments.push(Comment {
                    repo: repo.clone(),
                    pr_number: item.number,
                    pr_title: item.title.clone(),
                    file_path: node.path,
                    position: node.position,
                    comment: body,
                    diff_context: node.diff_hunk,
                    created_at: node.created_at,
                    updated_at: node.updated_at,
                    comment_url: node.html_url,
                });
            }
        }

        let fetched_so_far = u64::from(*page) * u64::from(PER_PAGE);
        Ok(SourcePage {
            comments,
            next: Position::Offset { page: page + 1 },
            has_more: fetched_so_far < search.total_count && !search.items.is_empty(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rest_comment(login: &str, url: &str, body: &str) -> serde_json::Value {
        serde_json::json!({
            "body": body,
            "path": "src/lib.rs",
            "position": 3,
            "diff_hunk": "@@ -1 +1 @@",
            "created_at": "2024-02-02T08:00:00Z",
            "updated_at": "2024-02-02T08:00:00Z",
            "html_url": url,
            "user": { "login": login }
        })
    }

    #[test]
    fn repo_extraction_from_pr_url() {
        assert_eq!(
            repo_from_pr_url("https://api.forge.example/repos/acme/widgets/pulls/9"),
            Some("acme/widgets".into())
        );
        assert_eq!(repo_from_pr_url("https://api.forge.example/nothing"), None);
    }

    #[tokio::test]
    async fn skips_failing_pr_and_keeps_page() {
        let server = MockServer::start().await;
        let base = server.uri();

        let search_body = serde_json::json!({
            "total_count": 2,
            "items": [
                {
                    "number": 1,
                    "title": "First PR",
                    "pull_request": { "url": format!("{base}/repos/acme/widgets/pulls/1") }
                },
                {
                    "number": 2,
                    "title": "Second PR",
                    "pull_request": { "url": format!("{base}/repos/acme/widgets/pulls/2") }
                }
            ]
        });

        Mock::given(method("GET"))
            .and(path("/search/issues"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body))
            .mount(&server)
            .await;

        // First PR's comments endpoint fails — must be skipped, not fatal
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls/1/comments"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls/2/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                rest_comment("bob", "https://forge.example/acme/widgets/pull/2#r1", "Nit: naming."),
                rest_comment("carol", "https://forge.example/acme/widgets/pull/2#r2", "LGTM"),
            ])))
            .mount(&server)
            .await;

        let adapter = OffsetAdapter::new(&base, "t").unwrap();
        let page = adapter
            .fetch_page(&Identity::new("BOB"), &Position::Offset { page: 1 })
            .await
            .unwrap();

        assert_eq!(page.comments.len(), 1);
        assert_eq!(page.comments[0].pr_number, 2);
        assert_eq!(page.comments[0].repo, "acme/widgets");
        assert_eq!(page.next, Position::Offset { page: 2 });
        assert!(!page.has_more); // 30 fetched ≥ total_count 2
    }

    #[tokio::test]
    async fn throttled_search_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/issues"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let adapter = OffsetAdapter::new(&server.uri(), "t").unwrap();
        let err = adapter
            .fetch_page(&Identity::new("bob"), &Position::Offset { page: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Throttled { .. }));
    }

    #[tokio::test]
    async fn reports_more_pages_when_total_exceeds_page() {
        let server = MockServer::start().await;

        let items: Vec<serde_json::Value> = (1..=30)
            .map(|n| {
                serde_json::json!({
                    "number": n,
                    "title": format!("PR {n}"),
                    "pull_request": null
                })
            })
            .collect();

        Mock::given(method("GET"))
            .and(path("/search/issues"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total_count": 95,
                "items": items
            })))
            .mount(&server)
            .await;

        let adapter = OffsetAdapter::new(&server.uri(), "t").unwrap();
        let page = adapter
            .fetch_page(&Identity::new("bob"), &Position::Offset { page: 1 })
            .await
            .unwrap();

        assert!(page.comments.is_empty());
        assert!(page.has_more);
    }
}
