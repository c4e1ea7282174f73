//! Shared types, error model, and configuration for ReviewHarvest.
//!
//! This crate is the foundation depended on by all other ReviewHarvest crates.
//! It provides:
//! - [`HarvestError`] — the unified error type
//! - Domain types ([`Comment`], [`Identity`], [`CrawlState`], [`PipelineRunSummary`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, GithubConfig, OpenAiConfig, PipelineConfig, QdrantConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, required_env,
    validate_credentials,
};
pub use error::{HarvestError, Result};
pub use types::{
    Candidate, Comment, CrawlState, EnrichedComment, FailedIdentity, Identity,
    PipelineRunSummary, Position, Stage, StageResult,
};
