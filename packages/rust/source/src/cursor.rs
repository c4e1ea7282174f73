//! Cursor-paginated GraphQL transport.
//!
//! Walks `user → pullRequests → reviewThreads → comments` one PR page at a
//! time, carrying the provider's opaque `endCursor` forward.

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use reviewharvest_shared::{Comment, HarvestError, Identity, Position, Result};

use crate::{
    REQUEST_TIMEOUT_SECS, SourceAdapter, SourceError, SourcePage, SourceResult, USER_AGENT,
    classify_send_error, classify_status,
};

/// PRs per page are fixed at 50 in the query; review threads and comments
/// are nested pages capped at the same size, which in practice covers a
/// reviewer's comments on a single PR.
const COMMENTS_QUERY: &str = r#"
query ($login: String!, $after: String) {
  user(login: $login) {
    pullRequests(first: 50, after: $after) {
      pageInfo {
        endCursor
        hasNextPage
      }
      nodes {
        number
        title
        repository {
          nameWithOwner
        }
        reviewThreads(first: 50) {
          nodes {
            comments(first: 50) {
              nodes {
                author {
                  login
                }
                body
                path
                position
                diffHunk
                createdAt
                updatedAt
                url
              }
            }
          }
        }
      }
    }
  }
}
"#;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<GraphQlData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlData {
    user: Option<UserNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserNode {
    pull_requests: PullRequestPage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestPage {
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<PullRequestNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    end_cursor: Option<String>,
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestNode {
    number: u64,
    title: String,
    repository: RepositoryNode,
    #[serde(default)]
    review_threads: ThreadPage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    name_with_owner: String,
}

#[derive(Debug, Default, Deserialize)]
struct ThreadPage {
    #[serde(default)]
    nodes: Vec<ThreadNode>,
}

#[derive(Debug, Deserialize)]
struct ThreadNode {
    #[serde(default)]
    comments: CommentPage,
}

#[derive(Debug, Default, Deserialize)]
struct CommentPage {
    #[serde(default)]
    nodes: Vec<ReviewCommentNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewCommentNode {
    author: Option<AuthorNode>,
    body: String,
    path: Option<String>,
    position: Option<i64>,
    diff_hunk: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct AuthorNode {
    login: String,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// GraphQL transport using an opaque forward cursor.
pub struct CursorAdapter {
    client: Client,
    endpoint: Url,
    token: String,
}

impl CursorAdapter {
    /// Create an adapter against the given GraphQL endpoint.
    pub fn new(endpoint: &str, token: impl Into<String>) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| HarvestError::config(format!("invalid GraphQL endpoint: {e}")))?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            token: token.into(),
        })
    }
}

#[async_trait::async_trait]
impl SourceAdapter for CursorAdapter {
    fn name(&self) -> &'static str {
        "cursor"
    }

    fn initial_position(&self) -> Position {
        Position::Cursor { after: None }
    }

    async fn fetch_page(
        &self,
        identity: &Identity,
        position: &Position,
    ) -> SourceResult<SourcePage> {
        let Position::Cursor { after } = position else {
            return Err(SourceError::Fatal(
                "cursor transport received an offset position".into(),
            ));
        };

        let body = serde_json::json!({
            "query": COMMENTS_QUERY,
            "variables": { "login": identity.as_str(), "after": after },
        });

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_send_error(self.endpoint.as_str(), e))?;

        if !response.status().is_success() {
            return Err(classify_status(&response));
        }

        let payload: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Transient(format!("response body: {e}")))?;

        if !payload.errors.is_empty() {
            let messages: Vec<&str> =
                payload.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(SourceError::Fatal(format!(
                "GraphQL errors: {}",
                messages.join("; ")
            )));
        }

        let Some(user) = payload.data.and_then(|d| d.user) else {
            return Err(SourceError::Fatal(format!(
                "no user data for {identity}"
            )));
        };

        let page = user.pull_requests;
        let mut comments = Vec::new();

        for pr in page.nodes {
            for thread in pr.review_threads.nodes {
                for node in thread.comments.nodes {
                    let Some(author) = &node.author else {
                        debug!(url = %node.url, "comment has no author, skipping");
                        continue;
                    };
                    if !identity.matches_login(&author.login) {
                        continue;
                    }
                    comments.push(Comment {
                        repo: pr.repository.name_with_owner.clone(),
                        pr_number: pr.number,
                        pr_title: pr.title.clone(),
                        file_path: node.path,
                        position: node.position,
                        comment: node.body,
                        diff_context: node.diff_hunk,
                        created_at: node.created_at,
                        updated_at: node.updated_at,
                        comment_url: node.url,
                    });
                }
            }
        }

        if page.page_info.end_cursor.is_none() && page.page_info.has_next_page {
            warn!(%identity, "provider reported more pages but no cursor");
        }

        Ok(SourcePage {
            comments,
            next: Position::Cursor {
                after: page.page_info.end_cursor,
            },
            has_more: page.page_info.has_next_page,
        })
    }
}
