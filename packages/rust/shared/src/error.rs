//! Error types for ReviewHarvest.
//!
//! Library crates use [`HarvestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all ReviewHarvest operations.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Configuration loading or validation error (missing credential,
    /// bad TOML). Aborts a run before any identity starts.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside the adapter taxonomy.
    #[error("network error: {0}")]
    Network(String),

    /// Source transport error surfaced past the collector boundary.
    #[error("source error: {0}")]
    Source(String),

    /// Artifact or crawl-state persistence error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Enrichment collaborator error.
    #[error("enrichment error: {0}")]
    Enrichment(String),

    /// Embedding/upload collaborator error.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Candidate discovery error.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a storage error from any displayable message.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = HarvestError::config("missing forge token");
        assert_eq!(err.to_string(), "config error: missing forge token");

        let err = HarvestError::storage("state file unreadable");
        assert!(err.to_string().contains("state file unreadable"));
    }
}
