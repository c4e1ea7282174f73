//! Crawl-state persistence.
//!
//! The state file stores only the resume position; the seen-set is
//! reconstructed from the comments artifact, so output and state remain
//! independently recoverable from each other. Load failure degrades to an
//! empty state.

use tracing::{debug, warn};

use reviewharvest_shared::{CrawlState, Identity, Result};

use crate::ArtifactStore;

impl ArtifactStore {
    /// Load crawl state for an identity. Missing or corrupt persisted
    /// state yields an empty state rather than an error.
    pub fn load_state(&self, identity: &Identity) -> CrawlState {
        let path = self.state_path(identity);

        let mut state: CrawlState = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(state) => state,
                Err(e) => {
                    warn!(%identity, error = %e, "corrupt crawl state, starting fresh");
                    CrawlState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CrawlState::default(),
            Err(e) => {
                warn!(%identity, error = %e, "unreadable crawl state, starting fresh");
                CrawlState::default()
            }
        };

        // Seed the seen-set from previously saved output.
        match self.read_comments(identity) {
            Ok(comments) => {
                for comment in &comments {
                    state.seen.insert(comment.comment_url.clone());
                }
            }
            Err(e) => {
                warn!(%identity, error = %e, "could not reconstruct seen-set from output");
            }
        }

        debug!(
            %identity,
            seen = state.seen.len(),
            resumable = state.position.is_some(),
            "loaded crawl state"
        );
        state
    }

    /// Persist crawl state for an identity (idempotent whole-file overwrite).
    pub fn save_state(&self, identity: &Identity, state: &CrawlState) -> Result<()> {
        let path = self.state_path(identity);
        let content = serde_json::to_string(state)
            .map_err(|e| reviewharvest_shared::HarvestError::storage(e.to_string()))?;
        std::fs::write(&path, content)
            .map_err(|e| reviewharvest_shared::HarvestError::io(&path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewharvest_shared::{Comment, Position};

    fn comment_with_url(url: &str) -> Comment {
        Comment {
            repo: "acme/widgets".into(),
            pr_number: 1,
            pr_title: "A PR".into(),
            file_path: None,
            position: None,
            comment: "body".into(),
            diff_context: None,
            created_at: None,
            updated_at: None,
            comment_url: url.into(),
        }
    }

    #[test]
    fn state_roundtrip_with_seen_reconstruction() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let alice = Identity::new("alice");

        store
            .write_comments(
                &alice,
                &[
                    comment_with_url("https://forge.example/c/1"),
                    comment_with_url("https://forge.example/c/2"),
                ],
            )
            .unwrap();

        let state = CrawlState {
            position: Some(Position::Cursor {
                after: Some("abc".into()),
            }),
            seen: Default::default(),
        };
        store.save_state(&alice, &state).unwrap();

        let loaded = store.load_state(&alice);
        assert_eq!(
            loaded.position,
            Some(Position::Cursor {
                after: Some("abc".into())
            })
        );
        // Seen-set comes from the output artifact, not the state file
        assert_eq!(loaded.seen.len(), 2);
        assert!(loaded.seen.contains("https://forge.example/c/1"));
    }

    #[test]
    fn missing_state_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();

        let state = store.load_state(&Identity::new("nobody"));
        assert!(state.is_empty());
    }

    #[test]
    fn corrupt_state_degrades_to_empty_but_keeps_seen() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let alice = Identity::new("alice");

        store
            .write_comments(&alice, &[comment_with_url("https://forge.example/c/1")])
            .unwrap();
        std::fs::write(store.state_path(&alice), "{not json").unwrap();

        let state = store.load_state(&alice);
        assert!(state.position.is_none());
        assert_eq!(state.seen.len(), 1);
    }

    #[test]
    fn state_without_output_has_no_seen() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let alice = Identity::new("alice");

        let state = CrawlState {
            position: Some(Position::Offset { page: 4 }),
            seen: Default::default(),
        };
        store.save_state(&alice, &state).unwrap();

        let loaded = store.load_state(&alice);
        assert_eq!(loaded.position, Some(Position::Offset { page: 4 }));
        assert!(loaded.seen.is_empty());
    }
}
