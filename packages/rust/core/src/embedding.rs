//! Embedding generation and vector-store upload.
//!
//! Reads an enriched artifact, embeds comment bodies in batches through an
//! OpenAI-compatible embeddings endpoint, and upserts the vectors with
//! their payloads into a Qdrant collection. The collection is created on
//! first use with the dimensionality of the first returned vector.

use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use url::Url;

use reviewharvest_shared::{EnrichedComment, HarvestError, Result};

/// Comments embedded per endpoint call.
const EMBED_BATCH_SIZE: usize = 64;

/// Request timeout for embedding and upsert calls.
const REQUEST_TIMEOUT_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Embeds an enriched artifact into a named vector-store collection.
/// Success is "no error"; the orchestrator depends only on this trait.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn process_and_upload(&self, input: &Path, collection: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct CreateCollectionRequest {
    vectors: VectorParams,
}

#[derive(Debug, Serialize)]
struct VectorParams {
    size: usize,
    distance: &'static str,
}

#[derive(Debug, Serialize)]
struct UpsertRequest {
    points: Vec<Point>,
}

#[derive(Debug, Serialize)]
struct Point {
    id: String,
    vector: Vec<f32>,
    payload: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Implementation
// ---------------------------------------------------------------------------

/// Embedder backed by an OpenAI-compatible embeddings endpoint and a
/// Qdrant vector store.
pub struct VectorUploader {
    client: Client,
    embed_endpoint: Url,
    api_key: String,
    embedding_model: String,
    qdrant_base: Url,
    qdrant_api_key: Option<String>,
}

impl VectorUploader {
    pub fn new(
        api_base: &str,
        api_key: impl Into<String>,
        embedding_model: impl Into<String>,
        qdrant_url: &str,
        qdrant_api_key: Option<String>,
    ) -> Result<Self> {
        // Trailing slashes keep any base path ("/v1") through the joins.
        let normalized = if api_base.ends_with('/') {
            api_base.to_string()
        } else {
            format!("{api_base}/")
        };
        let base = Url::parse(&normalized)
            .map_err(|e| HarvestError::config(format!("invalid API base URL: {e}")))?;
        let embed_endpoint = base
            .join("embeddings")
            .map_err(|e| HarvestError::config(format!("bad embeddings endpoint: {e}")))?;
        let normalized_qdrant = if qdrant_url.ends_with('/') {
            qdrant_url.to_string()
        } else {
            format!("{qdrant_url}/")
        };
        let qdrant_base = Url::parse(&normalized_qdrant)
            .map_err(|e| HarvestError::config(format!("invalid vector store URL: {e}")))?;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            embed_endpoint,
            api_key: api_key.into(),
            embedding_model: embedding_model.into(),
            qdrant_base,
            qdrant_api_key,
        })
    }

    /// Embed one batch of texts.
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: texts,
        };

        let response = self
            .client
            .post(self.embed_endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| HarvestError::Network(format!("{}: {e}", self.embed_endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Embedding(format!(
                "embeddings endpoint returned HTTP {status}"
            )));
        }

        let payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| HarvestError::Embedding(format!("invalid embeddings response: {e}")))?;

        Ok(payload.data.into_iter().map(|d| d.embedding).collect())
    }

    /// Create the collection if the store does not know it yet.
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()> {
        let url = self
            .qdrant_base
            .join(&format!("collections/{collection}"))
            .map_err(|e| HarvestError::Embedding(format!("bad collection URL: {e}")))?;

        let mut probe = self.client.get(url.clone());
        if let Some(key) = &self.qdrant_api_key {
            probe = probe.header("api-key", key);
        }
        let response = probe
            .send()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: {e}")))?;

        if response.status().is_success() {
            return Ok(());
        }

        info!(collection, dims, "creating vector collection");
        let mut create = self.client.put(url.clone()).json(&CreateCollectionRequest {
            vectors: VectorParams {
                size: dims,
                distance: "Cosine",
            },
        });
        if let Some(key) = &self.qdrant_api_key {
            create = create.header("api-key", key);
        }
        let response = create
            .send()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Embedding(format!(
                "collection create returned HTTP {status}"
            )));
        }
        Ok(())
    }

    /// Upsert one batch of points.
    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        let url = self
            .qdrant_base
            .join(&format!("collections/{collection}/points"))
            .map_err(|e| HarvestError::Embedding(format!("bad points URL: {e}")))?;

        let mut request = self.client.put(url.clone()).json(&UpsertRequest { points });
        if let Some(key) = &self.qdrant_api_key {
            request = request.header("api-key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Embedding(format!(
                "point upsert returned HTTP {status}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Embedder for VectorUploader {
    #[instrument(skip_all, fields(input = %input.display(), collection))]
    async fn process_and_upload(&self, input: &Path, collection: &str) -> Result<()> {
        let bytes = std::fs::read(input).map_err(|e| HarvestError::io(input, e))?;
        let enriched: Vec<EnrichedComment> = serde_json::from_slice(&bytes)
            .map_err(|e| HarvestError::Embedding(format!("{}: {e}", input.display())))?;

        if enriched.is_empty() {
            info!("nothing to embed");
            return Ok(());
        }

        let mut uploaded = 0usize;
        for batch in enriched.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|e| embedding_text(e)).collect();
            let vectors = self.embed_batch(texts).await?;

            if vectors.len() != batch.len() {
                return Err(HarvestError::Embedding(format!(
                    "endpoint returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                )));
            }

            if uploaded == 0 {
                let dims = vectors
                    .first()
                    .map(Vec::len)
                    .ok_or_else(|| HarvestError::Embedding("empty embedding batch".into()))?;
                self.ensure_collection(collection, dims).await?;
            }

            let points: Vec<Point> = batch
                .iter()
                .zip(vectors)
                .map(|(item, vector)| {
                    let payload = serde_json::to_value(item).map_err(|e| {
                        HarvestError::Embedding(format!("serialize payload: {e}"))
                    })?;
                    Ok(Point {
                        id: uuid::Uuid::now_v7().to_string(),
                        vector,
                        payload,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            uploaded += points.len();
            self.upsert(collection, points).await?;
        }

        info!(uploaded, collection, "embedding upload complete");
        Ok(())
    }
}

/// Text sent to the embedding model for one enriched comment.
fn embedding_text(item: &EnrichedComment) -> String {
    match &item.comment.diff_context {
        Some(diff) => format!("{}\n\n{}", item.comment.comment, diff),
        None => item.comment.comment.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
