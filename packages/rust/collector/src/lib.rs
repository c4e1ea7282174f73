//! Resumable, fallback-aware comment collection.
//!
//! Drives a source adapter through repeated page fetches until a target
//! count is reached or the source is exhausted, deduplicating by comment
//! URL. Resume state and the output artifact are persisted after every
//! page so a crash loses at most one page of progress. When the primary
//! transport reports throttling, the collector fails over to the secondary
//! transport — at most once per collect call — restarting from the
//! secondary's own initial position.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use reviewharvest_shared::{Comment, CrawlState, Identity, Result};
use reviewharvest_source::{SourceAdapter, SourceError, SourcePage, SourceResult};
use reviewharvest_store::ArtifactStore;

/// Default bound on same-request retries for transient failures.
const DEFAULT_TRANSIENT_RETRIES: u32 = 3;

/// Default pause between transient retries.
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Options & outcome
// ---------------------------------------------------------------------------

/// Options for one collect call.
#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Maximum deduplicated comments to produce (including any resumed ones).
    pub limit: usize,
    /// Resume from persisted state and output.
    pub continue_previous: bool,
    /// Re-fetch everything, bypassing previously persisted progress.
    pub all_historical: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            limit: 200,
            continue_previous: true,
            all_historical: false,
        }
    }
}

/// Summary of a completed, non-empty collect call.
#[derive(Debug, Clone)]
pub struct CollectReport {
    /// Deduplicated comments in insertion order of first discovery.
    pub comments: Vec<Comment>,
    /// Where the comments artifact was written.
    pub artifact_path: PathBuf,
    /// Pages fetched during this call (not counting resumed output).
    pub pages_fetched: usize,
    /// Whether the secondary transport took over mid-collection.
    pub failed_over: bool,
}

/// Outcome of a collect call. An empty result is reported distinctly so
/// callers can skip downstream stages instead of persisting an empty
/// artifact.
#[derive(Debug)]
pub enum CollectOutcome {
    Collected(CollectReport),
    Empty,
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Drives source adapters to produce deduplicated comments for one identity.
pub struct CommentCollector {
    primary: Box<dyn SourceAdapter>,
    secondary: Option<Box<dyn SourceAdapter>>,
    store: ArtifactStore,
    max_transient_retries: u32,
    retry_backoff: Duration,
}

impl CommentCollector {
    /// Create a collector with a primary transport and an optional
    /// failover transport.
    pub fn new(
        primary: Box<dyn SourceAdapter>,
        secondary: Option<Box<dyn SourceAdapter>>,
        store: ArtifactStore,
    ) -> Self {
        Self {
            primary,
            secondary,
            store,
            max_transient_retries: DEFAULT_TRANSIENT_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Override the transient retry policy.
    pub fn with_retry_policy(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_transient_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    /// Collect up to `opts.limit` deduplicated comments for `identity`.
    ///
    /// State and output are persisted after every page. Throttling and
    /// fatal source errors never propagate past this boundary: the
    /// collector stops with whatever it already has.
    #[instrument(skip_all, fields(identity = %identity, limit = opts.limit))]
    pub async fn collect(
        &self,
        identity: &Identity,
        opts: &CollectOptions,
    ) -> Result<CollectOutcome> {
        let resuming = opts.continue_previous && !opts.all_historical;

        let mut state = if resuming {
            self.store.load_state(identity)
        } else {
            CrawlState::default()
        };

        let mut comments: Vec<Comment> = if resuming {
            self.store.read_comments(identity)?
        } else {
            Vec::new()
        };

        if !comments.is_empty() {
            info!(existing = comments.len(), "continuing previous crawl");
        }
        if opts.all_historical {
            info!("fetching all historical comments, bypassing previous progress");
        }

        let mut active: &dyn SourceAdapter = self.primary.as_ref();
        let mut failed_over = false;

        // Saved positions only apply to the transport that produced them.
        let mut position = match state.position.take() {
            Some(saved) if saved.same_transport(&active.initial_position()) => saved,
            Some(_) => {
                debug!("saved position is from another transport, starting fresh");
                active.initial_position()
            }
            None => active.initial_position(),
        };

        let mut pages_fetched = 0usize;

        while comments.len() < opts.limit {
            let page = match self.fetch_with_retry(active, identity, &position).await {
                Ok(page) => page,
                Err(SourceError::Throttled { retry_after_secs }) => {
                    if let (false, Some(secondary)) = (failed_over, self.secondary.as_deref()) {
                        warn!(
                            from = active.name(),
                            to = secondary.name(),
                            ?retry_after_secs,
                            "throttled, failing over to secondary transport"
                        );
                        active = secondary;
                        position = active.initial_position();
                        failed_over = true;
                        continue;
                    }
                    warn!(
                        transport = active.name(),
                        "throttled with no failover left, stopping with partial output"
                    );
                    break;
                }
                Err(e) => {
                    warn!(
                        transport = active.name(),
                        error = %e,
                        "source error, stopping with partial output"
                    );
                    break;
                }
            };

            pages_fetched += 1;

            for comment in page.comments {
                if comments.len() >= opts.limit {
                    break;
                }
                // In all-historical mode the seen-set started empty, so
                // previously persisted URLs are re-fetched while in-run
                // pagination overlap still deduplicates.
                if state.seen.contains(&comment.comment_url) {
                    continue;
                }
                state.seen.insert(comment.comment_url.clone());
                comments.push(comment);
            }

            state.position = Some(page.next);

            // Persist both files each page so a crash loses at most one
            // page; the seen-set is recoverable from the output artifact.
            if !comments.is_empty() {
                self.store.write_comments(identity, &comments)?;
            }
            self.store.save_state(identity, &state)?;

            debug!(
                transport = active.name(),
                pages_fetched,
                collected = comments.len(),
                has_more = page.has_more,
                "page complete"
            );

            if !page.has_more {
                break;
            }
        }

        if comments.is_empty() {
            info!("no comments found, skipping artifact");
            return Ok(CollectOutcome::Empty);
        }

        let artifact_path = self.store.write_comments(identity, &comments)?;
        self.store.save_state(identity, &state)?;

        info!(
            collected = comments.len(),
            pages_fetched, failed_over, "collect complete"
        );

        Ok(CollectOutcome::Collected(CollectReport {
            comments,
            artifact_path,
            pages_fetched,
            failed_over,
        }))
    }

    /// Fetch one page, retrying transient failures against the same
    /// request up to the configured bound.
    async fn fetch_with_retry(
        &self,
        adapter: &dyn SourceAdapter,
        identity: &Identity,
        position: &reviewharvest_shared::Position,
    ) -> SourceResult<SourcePage> {
        let mut attempts = 0;
        loop {
            match adapter.fetch_page(identity, position).await {
                Err(SourceError::Transient(msg)) if attempts < self.max_transient_retries => {
                    attempts += 1;
                    warn!(
                        transport = adapter.name(),
                        attempts, error = %msg,
                        "transient error, retrying same request"
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(SourceError::Transient(msg)) => {
                    return Err(SourceError::Fatal(format!(
                        "transient retries exhausted: {msg}"
                    )));
                }
                other => return other,
            }
        }
    }
}
