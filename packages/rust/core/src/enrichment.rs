//! Comment enrichment via a chat-completion classification endpoint.
//!
//! Each collected comment is sent individually to the model, which returns
//! a category and short summary. The enriched artifact is rewritten after
//! every classification so an interrupted run can resume without repeating
//! completed calls.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use url::Url;

use reviewharvest_shared::{Comment, EnrichedComment, HarvestError, Result};

/// Fallback category when the model reply is not parseable.
const FALLBACK_CATEGORY: &str = "general";

/// Request timeout for classification calls.
const REQUEST_TIMEOUT_SECS: u64 = 60;

const SYSTEM_PROMPT: &str = "You are a code-review analyst. Given a pull \
request review comment and its diff context, reply with a JSON object \
containing two keys: \"category\" (a short kebab-case label such as \
\"error-handling\", \"naming\", \"performance\", \"testing\") and \
\"summary\" (one sentence describing the reviewer's point). Reply with \
JSON only.";

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Classifies a comments artifact into an enriched artifact.
///
/// The orchestrator depends only on this trait; it checks emptiness of the
/// returned list and nothing else about the implementation.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(
        &self,
        input: &Path,
        output: &Path,
        continue_from_previous: bool,
    ) -> Result<Vec<EnrichedComment>>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// The JSON object the model is instructed to reply with.
#[derive(Debug, Deserialize)]
struct Classification {
    category: String,
    #[serde(default)]
    summary: Option<String>,
}

// ---------------------------------------------------------------------------
// Implementation
// ---------------------------------------------------------------------------

/// Enricher backed by an OpenAI-compatible chat completion endpoint.
pub struct ChatEnricher {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

impl ChatEnricher {
    /// Create an enricher against the given API base URL (the
    /// `chat/completions` path is appended here).
    pub fn new(api_base: &str, api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        // A trailing slash keeps the base path ("/v1") through the join.
        let normalized = if api_base.ends_with('/') {
            api_base.to_string()
        } else {
            format!("{api_base}/")
        };
        let base = Url::parse(&normalized)
            .map_err(|e| HarvestError::config(format!("invalid API base URL: {e}")))?;
        let endpoint = base
            .join("chat/completions")
            .map_err(|e| HarvestError::config(format!("bad chat endpoint: {e}")))?;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// One classification call for one comment.
    async fn classify(&self, comment: &Comment) -> Result<Classification> {
        let mut user_prompt = format!(
            "Repository: {}\nPR #{}: {}\nFile: {}\n\nComment:\n{}",
            comment.repo,
            comment.pr_number,
            comment.pr_title,
            comment.file_path.as_deref().unwrap_or("(unknown)"),
            comment.comment,
        );
        if let Some(diff) = &comment.diff_context {
            user_prompt.push_str("\n\nDiff context:\n");
            user_prompt.push_str(diff);
        }

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| HarvestError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Enrichment(format!(
                "classification endpoint returned HTTP {status}"
            )));
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|e| HarvestError::Enrichment(format!("invalid chat response: {e}")))?;

        let content = payload
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| HarvestError::Enrichment("chat response had no choices".into()))?;

        // The model occasionally wraps its JSON in a code fence.
        let trimmed = content
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        match serde_json::from_str::<Classification>(trimmed) {
            Ok(c) => Ok(c),
            Err(e) => {
                warn!(error = %e, "unparseable classification reply, using fallback category");
                Ok(Classification {
                    category: FALLBACK_CATEGORY.to_string(),
                    summary: None,
                })
            }
        }
    }
}

#[async_trait]
impl Enricher for ChatEnricher {
    /// Classify every comment in `input`, writing the enriched artifact to
    /// `output` after each call. When `continue_from_previous` is set and
    /// an output artifact already exists, comments already present in it
    /// are not re-classified.
    #[instrument(skip_all, fields(input = %input.display()))]
    async fn enrich(
        &self,
        input: &Path,
        output: &Path,
        continue_from_previous: bool,
    ) -> Result<Vec<EnrichedComment>> {
        let comments = read_comments(input)?;

        let mut enriched: Vec<EnrichedComment> = if continue_from_previous && output.exists() {
            read_enriched(output)?
        } else {
            Vec::new()
        };

        let done: HashSet<String> = enriched
            .iter()
            .map(|e| e.comment.comment_url.clone())
            .collect();

        if !done.is_empty() {
            info!(already_enriched = done.len(), "resuming previous enrichment");
        }

        for comment in &comments {
            if done.contains(&comment.comment_url) {
                continue;
            }

            let classification = self.classify(comment).await?;
            enriched.push(EnrichedComment {
                comment: comment.clone(),
                category: classification.category,
                summary: classification.summary,
            });

            write_enriched(output, &enriched)?;
        }

        info!(total = enriched.len(), "enrichment complete");
        Ok(enriched)
    }
}

// ---------------------------------------------------------------------------
// Artifact IO
// ---------------------------------------------------------------------------

fn read_comments(path: &Path) -> Result<Vec<Comment>> {
    let bytes = std::fs::read(path).map_err(|e| HarvestError::io(path, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| HarvestError::Enrichment(format!("{}: {e}", path.display())))
}

fn read_enriched(path: &Path) -> Result<Vec<EnrichedComment>> {
    let bytes = std::fs::read(path).map_err(|e| HarvestError::io(path, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| HarvestError::Enrichment(format!("{}: {e}", path.display())))
}

fn write_enriched(path: &Path, enriched: &[EnrichedComment]) -> Result<()> {
    let json = serde_json::to_string_pretty(enriched)
        .map_err(|e| HarvestError::Enrichment(format!("serialize enriched: {e}")))?;
    std::fs::write(path, json).map_err(|e| HarvestError::io(path, e))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn comment(url: &str, body: &str) -> Comment {
        Comment {
            repo: "acme/widgets".into(),
            pr_number: 7,
            pr_title: "Add widget".into(),
            file_path: Some("src/lib.rs".into()),
            position: Some(3),
            comment: body.into(),
            diff_context: None,
            created_at: None,
            updated_at: None,
            comment_url: url.into(),
        }
    }

    fn chat_reply(category: &str, summary: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": format!(
                        r#"{{"category": "{category}", "summary": "{summary}"}}"#
                    )
                }
            }]
        })
    }

    fn write_comments_file(dir: &std::path::Path, comments: &[Comment]) -> std::path::PathBuf {
        let path = dir.join("in.json");
        std::fs::write(&path, serde_json::to_string(comments).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn enriches_every_comment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(
                "error-handling",
                "Suggests propagating the error.",
            )))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = write_comments_file(
            dir.path(),
            &[comment("https://x/1", "use ?"), comment("https://x/2", "rename")],
        );
        let output = dir.path().join("out.json");

        let enricher =
            ChatEnricher::new(&format!("{}/", server.uri()), "k", "test-model").unwrap();
        let enriched = enricher.enrich(&input, &output, true).await.unwrap();

        assert_eq!(enriched.len(), 2);
        assert_eq!(enriched[0].category, "error-handling");
        assert!(output.exists());
    }

    #[tokio::test]
    async fn resume_skips_already_enriched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(chat_reply("naming", "Rename it.")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = write_comments_file(
            dir.path(),
            &[comment("https://x/1", "a"), comment("https://x/2", "b")],
        );
        let output = dir.path().join("out.json");

        let previous = vec![EnrichedComment {
            comment: comment("https://x/1", "a"),
            category: "testing".into(),
            summary: None,
        }];
        std::fs::write(&output, serde_json::to_string(&previous).unwrap()).unwrap();

        let enricher =
            ChatEnricher::new(&format!("{}/", server.uri()), "k", "test-model").unwrap();
        let enriched = enricher.enrich(&input, &output, true).await.unwrap();

        assert_eq!(enriched.len(), 2);
        assert_eq!(enriched[0].category, "testing");
        assert_eq!(enriched[1].category, "naming");
    }

    #[tokio::test]
    async fn unparseable_reply_falls_back_to_general() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": "not json" } }]
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = write_comments_file(dir.path(), &[comment("https://x/1", "a")]);
        let output = dir.path().join("out.json");

        let enricher =
            ChatEnricher::new(&format!("{}/", server.uri()), "k", "test-model").unwrap();
        let enriched = enricher.enrich(&input, &output, true).await.unwrap();

        assert_eq!(enriched[0].category, FALLBACK_CATEGORY);
        assert!(enriched[0].summary.is_none());
    }

    #[tokio::test]
    async fn endpoint_failure_is_enrichment_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = write_comments_file(dir.path(), &[comment("https://x/1", "a")]);
        let output = dir.path().join("out.json");

        let enricher =
            ChatEnricher::new(&format!("{}/", server.uri()), "k", "test-model").unwrap();
        let err = enricher.enrich(&input, &output, true).await.unwrap_err();
        assert!(matches!(err, HarvestError::Enrichment(_)));
    }
}
