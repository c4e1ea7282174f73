//! Per-identity artifact storage for ReviewHarvest.
//!
//! Artifacts are whole JSON files under one output directory, partitioned
//! one-per-identity so no cross-identity locking is needed:
//! `{login}_comments.json`, its `.state` companion,
//! `{login}_comments.enriched.json`, and a run-level
//! `{domain}_pipeline_results.json`. Read/overwrite-whole-file semantics
//! are the only contract between the pipeline and the rest of the system.

mod state;

use std::path::{Path, PathBuf};

use reviewharvest_shared::{
    Comment, EnrichedComment, HarvestError, Identity, PipelineRunSummary, Result,
};

/// File-backed artifact store rooted at one output directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) an artifact store at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| HarvestError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the collected-comments artifact for an identity.
    pub fn comments_path(&self, identity: &Identity) -> PathBuf {
        self.root.join(format!("{identity}_comments.json"))
    }

    /// Path of the resume-state companion file for an identity.
    pub fn state_path(&self, identity: &Identity) -> PathBuf {
        self.root.join(format!("{identity}_comments.json.state"))
    }

    /// Path of the enriched-comments artifact for an identity.
    pub fn enriched_path(&self, identity: &Identity) -> PathBuf {
        self.root.join(format!("{identity}_comments.enriched.json"))
    }

    /// Path of the run-level summary artifact for a domain tag.
    pub fn summary_path(&self, domain: &str) -> PathBuf {
        self.root.join(format!("{domain}_pipeline_results.json"))
    }

    /// Read previously collected comments. A missing artifact is an empty
    /// collection, not an error.
    pub fn read_comments(&self, identity: &Identity) -> Result<Vec<Comment>> {
        read_json_or_default(&self.comments_path(identity))
    }

    /// Overwrite the comments artifact for an identity.
    pub fn write_comments(&self, identity: &Identity, comments: &[Comment]) -> Result<PathBuf> {
        let path = self.comments_path(identity);
        write_json(&path, comments)?;
        Ok(path)
    }

    /// Read previously enriched comments. Missing artifact is empty.
    pub fn read_enriched(&self, identity: &Identity) -> Result<Vec<EnrichedComment>> {
        read_json_or_default(&self.enriched_path(identity))
    }

    /// Overwrite the enriched-comments artifact for an identity.
    pub fn write_enriched(
        &self,
        identity: &Identity,
        enriched: &[EnrichedComment],
    ) -> Result<PathBuf> {
        let path = self.enriched_path(identity);
        write_json(&path, enriched)?;
        Ok(path)
    }

    /// Persist the run summary, overwriting any previous run's file.
    pub fn write_summary(&self, summary: &PipelineRunSummary) -> Result<PathBuf> {
        let path = self.summary_path(&summary.domain);
        write_json(&path, summary)?;
        Ok(path)
    }
}

/// Deserialize a JSON file, treating a missing file as the default value.
fn read_json_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| HarvestError::storage(format!("{}: {e}", path.display())))
}

/// Serialize a value as pretty JSON and overwrite the whole file.
fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| HarvestError::storage(format!("{}: {e}", path.display())))?;
    std::fs::write(path, content).map_err(|e| HarvestError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_comment(url: &str) -> Comment {
        Comment {
            repo: "acme/widgets".into(),
            pr_number: 1,
            pr_title: "A PR".into(),
            file_path: None,
            position: None,
            comment: "Looks off.".into(),
            diff_context: None,
            created_at: None,
            updated_at: None,
            comment_url: url.into(),
        }
    }

    #[test]
    fn comments_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let alice = Identity::new("alice");

        let comments = vec![
            sample_comment("https://forge.example/c/1"),
            sample_comment("https://forge.example/c/2"),
        ];
        let path = store.write_comments(&alice, &comments).unwrap();
        assert!(path.ends_with("alice_comments.json"));

        let loaded = store.read_comments(&alice).unwrap();
        assert_eq!(loaded, comments);
    }

    #[test]
    fn missing_artifacts_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let nobody = Identity::new("nobody");

        assert!(store.read_comments(&nobody).unwrap().is_empty());
        assert!(store.read_enriched(&nobody).unwrap().is_empty());
    }

    #[test]
    fn summary_written_under_domain_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();

        let summary = PipelineRunSummary::new("rust");
        let path = store.write_summary(&summary).unwrap();
        assert!(path.ends_with("rust_pipeline_results.json"));
        assert!(path.exists());
    }

    #[test]
    fn overwrite_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let alice = Identity::new("alice");

        let comments = vec![sample_comment("https://forge.example/c/1")];
        store.write_comments(&alice, &comments).unwrap();
        store.write_comments(&alice, &comments).unwrap();

        assert_eq!(store.read_comments(&alice).unwrap(), comments);
    }
}
