//! Candidate identity discovery.
//!
//! When no identity list is configured, the pipeline asks the forge's user
//! search for active reviewers in a domain (a language tag) and takes the
//! provider's relevance score as the ranking signal. The scoring formula
//! itself lives upstream; this module only surfaces an ordered list.

use reqwest::Client;
use serde::Deserialize;
use tracing::{info, instrument};
use url::Url;

use reviewharvest_shared::{Candidate, HarvestError, Result};

/// User-Agent string for discovery requests.
const USER_AGENT: &str = concat!("ReviewHarvest/", env!("CARGO_PKG_VERSION"));

/// Request timeout for discovery calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Follower floor in the search query; keeps the candidate pool to
/// accounts with enough review activity to be worth crawling.
const MIN_FOLLOWERS: u32 = 1000;

#[derive(Debug, Deserialize)]
struct UserSearchResponse {
    #[serde(default)]
    items: Vec<UserSearchItem>,
}

#[derive(Debug, Deserialize)]
struct UserSearchItem {
    login: String,
    #[serde(default)]
    score: f64,
}

/// Client for the forge's user-search endpoint.
pub struct DiscoveryClient {
    client: Client,
    rest_base: Url,
    token: String,
}

impl DiscoveryClient {
    /// Create a discovery client against the given REST API base URL.
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

    /// Find up to `max_count` candidate identities for a domain tag,
    /// ordered descending by score.
    #[instrument(skip_all, fields(domain = domain_tag, max_count))]
    pub async fn find_candidates(
        &self,
        domain_tag: &str,
        max_count: usize,
    ) -> Result<Vec<Candidate>> {
        let url = self
            .rest_base
            .join("search/users")
            .map_err(|e| HarvestError::Discovery(format!("bad search URL: {e}")))?;

        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.token)
            .header("accept", "application/vnd.github.v3+json")
            .query(&[
                (
                    "q",
                    format!("language:{domain_tag} followers:>{MIN_FOLLOWERS}"),
                ),
                ("per_page", max_count.to_string()),
            ])
            .send()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Discovery(format!("{url}: HTTP {status}")));
        }

        let payload: UserSearchResponse = response
            .json()
            .await
            .map_err(|e| HarvestError::Discovery(format!("search body: {e}")))?;

        let mut candidates: Vec<Candidate> = payload
            .items
            .into_iter()
            .map(|item| Candidate {
                login: item.login,
                score: item.score,
            })
            .collect();

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(max_count);

        info!(found = candidates.len(), "discovered candidates");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param_contains};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn candidates_sorted_descending_by_score() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/search/users"))
            .and(query_param_contains("q", "language:rust"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total_count": 3,
                "items": [
                    { "login": "mid", "score": 5.0 },
                    { "login": "top", "score": 9.5 },
                    { "login": "low", "score": 1.0 }
                ]
            })))
            .mount(&server)
            .await;

        let client = DiscoveryClient::new(&server.uri(), "t").unwrap();
        let candidates = client.find_candidates("rust", 10).await.unwrap();

        let logins: Vec<&str> = candidates.iter().map(|c| c.login.as_str()).collect();
        assert_eq!(logins, vec!["top", "mid", "low"]);
    }

    #[tokio::test]
    async fn respects_max_count() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/search/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total_count": 3,
                "items": [
                    { "login": "a", "score": 3.0 },
                    { "login": "b", "score": 2.0 },
                    { "login": "c", "score": 1.0 }
                ]
            })))
            .mount(&server)
            .await;

        let client = DiscoveryClient::new(&server.uri(), "t").unwrap();
        let candidates = client.find_candidates("rust", 2).await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].login, "a");
    }

    #[tokio::test]
    async fn search_failure_is_discovery_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/search/users"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;

        let client = DiscoveryClient::new(&server.uri(), "t").unwrap();
        let err = client.find_candidates("rust", 5).await.unwrap_err();
        assert!(matches!(err, HarvestError::Discovery(_)));
    }
}
