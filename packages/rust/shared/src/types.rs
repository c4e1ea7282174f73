//! Core domain types for ReviewHarvest.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A tracked login/handle whose authored review comments are collected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub String);

impl Identity {
    pub fn new(login: impl Into<String>) -> Self {
        Self(login.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive authorship check against a raw provider login.
    pub fn matches_login(&self, login: &str) -> bool {
        self.0.eq_ignore_ascii_case(login)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Identity {
    fn from(login: &str) -> Self {
        Self(login.to_string())
    }
}

// ---------------------------------------------------------------------------
// Comment
// ---------------------------------------------------------------------------

/// One authored review comment. Immutable once fetched; the comment URL
/// is its natural key. Field names match the on-disk JSON artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Repository identifier as "owner/name".
    pub repo: String,
    /// Pull request number within the repository.
    pub pr_number: u64,
    /// Pull request title.
    pub pr_title: String,
    /// File the comment was left on, if the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Diff position of the comment, if still resolvable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    /// The comment body text.
    pub comment: String,
    /// Diff hunk the comment was anchored to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_context: Option<String>,
    /// Creation timestamp (RFC 3339, as reported by the provider).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Last-update timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Globally unique comment URL — the natural key for deduplication.
    pub comment_url: String,
}

/// A comment plus the classification attached by the enrichment stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedComment {
    #[serde(flatten)]
    pub comment: Comment,
    /// Review-comment category (e.g. "correctness", "style").
    pub category: String,
    /// One-sentence summary of the reviewer's point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

// ---------------------------------------------------------------------------
// Position & CrawlState
// ---------------------------------------------------------------------------

/// A pointer into a paginated upstream result set. Variants are
/// transport-specific and never interchangeable across adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum Position {
    /// Opaque forward cursor for the graph transport.
    Cursor {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after: Option<String>,
    },
    /// Numbered page for the search transport (1-based).
    Offset { page: u32 },
}

impl Position {
    /// Whether two positions belong to the same transport. Resume state
    /// saved under one transport is discarded when the other is active.
    pub fn same_transport(&self, other: &Position) -> bool {
        matches!(
            (self, other),
            (Position::Cursor { .. }, Position::Cursor { .. })
                | (Position::Offset { .. }, Position::Offset { .. })
        )
    }
}

/// Per-identity crawl progress: resume position plus the set of comment
/// URLs already ingested. Only the position is persisted; the seen-set is
/// reconstructed from the saved comments artifact on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlState {
    /// Resume position for the active transport, if a crawl has run before.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// Comment URLs already ingested. Grows monotonically while resuming.
    #[serde(skip)]
    pub seen: HashSet<String>,
}

impl CrawlState {
    pub fn is_empty(&self) -> bool {
        self.position.is_none() && self.seen.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Stages & results
// ---------------------------------------------------------------------------

/// One unit of per-identity work with a single external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Collect,
    Enrich,
    Embed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collect => "collect",
            Self::Enrich => "enrich",
            Self::Embed => "embed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one stage for one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageResult {
    /// Stage completed; payload artifact lives at the given location.
    Succeeded { artifact: std::path::PathBuf },
    /// Stage failed (hard error or soft empty result).
    Failed { reason: String },
}

impl StageResult {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

/// A failed identity with the recorded reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedIdentity {
    pub login: String,
    pub reason: String,
}

/// Aggregate counters for one pipeline run, persisted once at the end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunSummary {
    /// Unique run identifier (UUID v7, time-sortable).
    pub run_id: Uuid,
    /// Domain tag the run was scoped to (e.g. a language).
    pub domain: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Identities that reached the terminal Done state.
    pub identities_succeeded: usize,
    /// Identities that reached the terminal Failed state.
    pub identities_failed: usize,
    /// Total comments collected across all identities.
    pub total_comments: usize,
    pub successful: Vec<String>,
    pub failed: Vec<FailedIdentity>,
}

impl PipelineRunSummary {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            domain: domain.into(),
            started_at: Utc::now(),
            finished_at: None,
            identities_succeeded: 0,
            identities_failed: 0,
            total_comments: 0,
            successful: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn record_success(&mut self, identity: &Identity, comments: usize) {
        self.identities_succeeded += 1;
        self.total_comments += comments;
        self.successful.push(identity.to_string());
    }

    pub fn record_failure(&mut self, identity: &Identity, reason: impl Into<String>) {
        self.identities_failed += 1;
        self.failed.push(FailedIdentity {
            login: identity.to_string(),
            reason: reason.into(),
        });
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// A candidate identity surfaced by the discovery collaborator,
/// ordered descending by score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub login: String,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_matches_login_case_insensitive() {
        let id = Identity::new("Alice");
        assert!(id.matches_login("alice"));
        assert!(id.matches_login("ALICE"));
        assert!(!id.matches_login("bob"));
    }

    #[test]
    fn comment_roundtrip_uses_artifact_field_names() {
        let comment = Comment {
            repo: "acme/widgets".into(),
            pr_number: 42,
            pr_title: "Fix the frobnicator".into(),
            file_path: Some("src/frob.rs".into()),
            position: Some(7),
            comment: "This allocation is avoidable.".into(),
            diff_context: Some("@@ -1,3 +1,4 @@".into()),
            created_at: Some("2024-01-01T00:00:00Z".into()),
            updated_at: None,
            comment_url: "https://forge.example/acme/widgets/pull/42#r1".into(),
        };

        let json = serde_json::to_value(&comment).expect("serialize");
        assert_eq!(json["repo"], "acme/widgets");
        assert_eq!(json["comment_url"], comment.comment_url);
        assert!(json.get("updated_at").is_none());

        let parsed: Comment = serde_json::from_value(json).expect("deserialize");
        assert_eq!(parsed, comment);
    }

    #[test]
    fn position_transport_matching() {
        let cursor = Position::Cursor {
            after: Some("abc".into()),
        };
        let cursor_start = Position::Cursor { after: None };
        let offset = Position::Offset { page: 3 };

        assert!(cursor.same_transport(&cursor_start));
        assert!(!cursor.same_transport(&offset));
        assert!(offset.same_transport(&Position::Offset { page: 1 }));
    }

    #[test]
    fn crawl_state_seen_set_not_serialized() {
        let mut state = CrawlState {
            position: Some(Position::Offset { page: 2 }),
            seen: HashSet::new(),
        };
        state.seen.insert("https://forge.example/c/1".into());

        let json = serde_json::to_string(&state).expect("serialize");
        assert!(!json.contains("forge.example/c/1"));

        let parsed: CrawlState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.position, Some(Position::Offset { page: 2 }));
        assert!(parsed.seen.is_empty());
    }

    #[test]
    fn summary_counters() {
        let mut summary = PipelineRunSummary::new("rust");
        summary.record_success(&Identity::new("alice"), 120);
        summary.record_failure(&Identity::new("bob"), "no comments");

        assert_eq!(summary.identities_succeeded, 1);
        assert_eq!(summary.identities_failed, 1);
        assert_eq!(summary.total_comments, 120);
        assert_eq!(summary.failed[0].login, "bob");
        assert_eq!(summary.failed[0].reason, "no comments");
    }
}
