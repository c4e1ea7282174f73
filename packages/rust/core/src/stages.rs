//! Stage execution behind the orchestrator's seam.
//!
//! The orchestrator drives identities through stages via the `StageRunner`
//! trait; `HarvestStages` is the production wiring of collector, enricher
//! and embedder. Stage errors never escape `run`: every failure becomes a
//! `StageResult::Failed` the orchestrator records per identity.

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use reviewharvest_collector::{CollectOptions, CollectOutcome, CommentCollector};
use reviewharvest_shared::{Identity, Stage, StageResult};
use reviewharvest_store::ArtifactStore;

use crate::embedding::Embedder;
use crate::enrichment::Enricher;

/// Failure reason recorded when a collect produces nothing.
pub const REASON_NO_COMMENTS: &str = "no comments";

/// Failure reason recorded when enrichment produces nothing.
pub const REASON_NO_ENRICHED: &str = "no enriched comments";

/// Executes one stage for one identity. The orchestrator converts an
/// escaping panic into a stage failure, so implementations only need to
/// report errors through [`StageResult::Failed`].
#[async_trait]
pub trait StageRunner: Send + Sync + 'static {
    async fn run(&self, stage: Stage, identity: &Identity) -> StageResult;

    /// Deduplicated comment count for a finished identity, used for the
    /// run summary.
    fn collected_count(&self, identity: &Identity) -> usize;
}

/// Production stage wiring: collect via source adapters, enrich via the
/// classification endpoint, embed into the vector store.
pub struct HarvestStages {
    collector: CommentCollector,
    enricher: Box<dyn Enricher>,
    embedder: Box<dyn Embedder>,
    store: ArtifactStore,
    collect_options: CollectOptions,
    collection: String,
}

impl HarvestStages {
    pub fn new(
        collector: CommentCollector,
        enricher: Box<dyn Enricher>,
        embedder: Box<dyn Embedder>,
        store: ArtifactStore,
        collect_options: CollectOptions,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            collector,
            enricher,
            embedder,
            store,
            collect_options,
            collection: collection.into(),
        }
    }

    async fn run_collect(&self, identity: &Identity) -> StageResult {
        match self.collector.collect(identity, &self.collect_options).await {
            Ok(CollectOutcome::Collected(report)) => {
                info!(
                    identity = %identity,
                    comments = report.comments.len(),
                    pages = report.pages_fetched,
                    failed_over = report.failed_over,
                    "collect stage complete"
                );
                StageResult::Succeeded {
                    artifact: report.artifact_path,
                }
            }
            Ok(CollectOutcome::Empty) => StageResult::failed(REASON_NO_COMMENTS),
            Err(e) => StageResult::failed(e.to_string()),
        }
    }

    async fn run_enrich(&self, identity: &Identity) -> StageResult {
        let input = self.store.comments_path(identity);
        if !input.exists() {
            return StageResult::failed(format!(
                "comments artifact not found: {}",
                input.display()
            ));
        }

        let output = self.store.enriched_path(identity);
        match self
            .enricher
            .enrich(&input, &output, self.collect_options.continue_previous)
            .await
        {
            Ok(enriched) if enriched.is_empty() => StageResult::failed(REASON_NO_ENRICHED),
            Ok(enriched) => {
                info!(identity = %identity, enriched = enriched.len(), "enrich stage complete");
                StageResult::Succeeded { artifact: output }
            }
            Err(e) => StageResult::failed(e.to_string()),
        }
    }

    async fn run_embed(&self, identity: &Identity) -> StageResult {
        let input = self.store.enriched_path(identity);
        if !input.exists() {
            return StageResult::failed(format!(
                "enriched artifact not found: {}",
                input.display()
            ));
        }

        // An embedding error fails the stage like any other stage error.
        match self.embedder.process_and_upload(&input, &self.collection).await {
            Ok(()) => {
                info!(identity = %identity, collection = %self.collection, "embed stage complete");
                StageResult::Succeeded { artifact: input }
            }
            Err(e) => StageResult::failed(e.to_string()),
        }
    }
}

#[async_trait]
impl StageRunner for HarvestStages {
    #[instrument(skip_all, fields(stage = %stage, identity = %identity))]
    async fn run(&self, stage: Stage, identity: &Identity) -> StageResult {
        let result = match stage {
            Stage::Collect => self.run_collect(identity).await,
            Stage::Enrich => self.run_enrich(identity).await,
            Stage::Embed => self.run_embed(identity).await,
        };

        if let StageResult::Failed { reason } = &result {
            warn!(reason = %reason, "stage failed");
        }
        result
    }

    fn collected_count(&self, identity: &Identity) -> usize {
        self.store
            .read_comments(identity)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}
