//! Source adapters for fetching review comments from a forge.
//!
//! Two transports expose the same paginated walk behind [`SourceAdapter`]:
//! [`CursorAdapter`] drives the GraphQL endpoint with an opaque forward
//! cursor, [`OffsetAdapter`] drives the REST search endpoint with numbered
//! pages. Positions are transport-specific ([`Position`]) and are never
//! shared across adapters; the collector swaps the active adapter on
//! throttling and restarts from the other transport's own position.

mod cursor;
mod offset;

use async_trait::async_trait;

use reviewharvest_shared::{Comment, Identity, Position};

pub use cursor::CursorAdapter;
pub use offset::OffsetAdapter;

/// User-Agent string for forge API requests.
pub(crate) const USER_AGENT: &str = concat!("ReviewHarvest/", env!("CARGO_PKG_VERSION"));

/// Request timeout for forge API calls.
pub(crate) const REQUEST_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Transport-level failure modes, translated by the collector.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Rate limited by the provider. The caller should wait or fail over
    /// to the other transport; this is never a final failure by itself.
    #[error("throttled by provider (retry after {retry_after_secs:?}s)")]
    Throttled { retry_after_secs: Option<u64> },

    /// Transient network failure. The same request may be retried.
    #[error("transient network error: {0}")]
    Transient(String),

    /// No usable data. Aborts this identity's collect stage; whatever was
    /// already collected is preserved.
    #[error("fatal source error: {0}")]
    Fatal(String),
}

/// Result alias for adapter calls.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Classify an HTTP error status into the taxonomy.
///
/// 403 with an exhausted rate-limit header and 429 are throttling; 5xx is
/// transient; everything else is fatal for this identity.
pub(crate) fn classify_status(response: &reqwest::Response) -> SourceError {
    let status = response.status();

    let rate_limited = status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || (status == reqwest::StatusCode::FORBIDDEN
            && response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == "0"));

    if rate_limited {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        return SourceError::Throttled { retry_after_secs };
    }

    if status.is_server_error() {
        return SourceError::Transient(format!("HTTP {status}"));
    }

    SourceError::Fatal(format!("HTTP {status}"))
}

/// Classify a reqwest error (connect failure, timeout) as transient.
pub(crate) fn classify_send_error(url: &str, err: reqwest::Error) -> SourceError {
    SourceError::Transient(format!("{url}: {err}"))
}

// ---------------------------------------------------------------------------
// Page result & trait
// ---------------------------------------------------------------------------

/// One page of comments from a transport, already filtered to the target
/// identity's authorship.
#[derive(Debug, Clone)]
pub struct SourcePage {
    /// Comments authored by the target identity, in provider order.
    pub comments: Vec<Comment>,
    /// Position of the page after this one, in this transport's semantics.
    pub next: Position,
    /// Whether the provider reports further pages.
    pub has_more: bool,
}

/// Capability interface over one comment-fetch transport.
///
/// Implementations filter raw provider records to those authored by the
/// target identity (case-insensitive) before returning them — each
/// transport exposes authorship differently, so the filter lives at this
/// boundary.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Transport name for logging.
    fn name(&self) -> &'static str;

    /// The position a fresh crawl starts from on this transport.
    fn initial_position(&self) -> Position;

    /// Fetch one page of comments authored by `identity` at `position`.
    async fn fetch_page(&self, identity: &Identity, position: &Position)
    -> SourceResult<SourcePage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn classify_forbidden_with_exhausted_ratelimit_is_throttled() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "0")
                    .insert_header("retry-after", "42"),
            )
            .mount(&server)
            .await;

        let response = reqwest::get(server.uri()).await.unwrap();
        match classify_status(&response) {
            SourceError::Throttled { retry_after_secs } => {
                assert_eq!(retry_after_secs, Some(42));
            }
            other => panic!("expected Throttled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn classify_plain_forbidden_is_fatal() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let response = reqwest::get(server.uri()).await.unwrap();
        assert!(matches!(classify_status(&response), SourceError::Fatal(_)));
    }

    #[tokio::test]
    async fn classify_server_error_is_transient() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let response = reqwest::get(server.uri()).await.unwrap();
        assert!(matches!(
            classify_status(&response),
            SourceError::Transient(_)
        ));
    }
}
