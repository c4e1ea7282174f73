//! Application configuration for ReviewHarvest.
//!
//! User config lives at `~/.reviewharvest/reviewharvest.toml`.
//! CLI flags override config file values, which override defaults.
//! API keys are never stored in the file — only the env var names.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "reviewharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".reviewharvest";

// ---------------------------------------------------------------------------
// Config structs (matching reviewharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Forge (code host) API settings.
    #[serde(default)]
    pub github: GithubConfig,

    /// Enrichment / embedding model settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Vector store settings.
    #[serde(default)]
    pub qdrant: QdrantConfig,

    /// Explicit identity list. When empty, discovery supplies candidates.
    #[serde(default)]
    pub identities: Vec<String>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory where per-identity artifacts are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Maximum comments to collect per identity.
    #[serde(default = "default_comment_limit")]
    pub comment_limit: usize,

    /// Maximum identities in an active pipeline stage at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,

    /// Delay between successive identity admissions, in milliseconds.
    #[serde(default = "default_admission_delay_ms")]
    pub admission_delay_ms: u64,

    /// Use the offset (search) transport as primary instead of the cursor one.
    #[serde(default)]
    pub prefer_offset: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            comment_limit: default_comment_limit(),
            max_concurrent_tasks: default_max_concurrent(),
            admission_delay_ms: default_admission_delay_ms(),
            prefer_offset: false,
        }
    }
}

fn default_output_dir() -> String {
    "data".into()
}
fn default_comment_limit() -> usize {
    200
}
fn default_max_concurrent() -> usize {
    5
}
fn default_admission_delay_ms() -> u64 {
    500
}

/// `[github]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// Name of the env var holding the API token (never the token itself).
    #[serde(default = "default_github_token_env")]
    pub token_env: String,

    /// REST API base URL.
    #[serde(default = "default_rest_base")]
    pub rest_base: String,

    /// GraphQL endpoint URL.
    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token_env: default_github_token_env(),
            rest_base: default_rest_base(),
            graphql_url: default_graphql_url(),
        }
    }
}

fn default_github_token_env() -> String {
    "GITHUB_TOKEN".into()
}
fn default_rest_base() -> String {
    "https://api.github.com".into()
}
fn default_graphql_url() -> String {
    "https://api.github.com/graphql".into()
}

/// `[openai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Name of the env var holding the API key.
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,

    /// API base URL.
    #[serde(default = "default_openai_base")]
    pub api_base: String,

    /// Chat model used for comment classification.
    #[serde(default = "default_chat_model")]
    pub model: String,

    /// Embedding model used by the embed stage.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_openai_key_env(),
            api_base: default_openai_base(),
            model: default_chat_model(),
            embedding_model: default_embedding_model(),
        }
    }
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_openai_base() -> String {
    "https://api.openai.com/v1".into()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

/// `[qdrant]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantConfig {
    /// Vector store URL.
    #[serde(default = "default_qdrant_url")]
    pub url: String,

    /// Name of the env var holding the API key, if the store requires one.
    #[serde(default = "default_qdrant_key_env")]
    pub api_key_env: String,

    /// Default collection name for upserts.
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            api_key_env: default_qdrant_key_env(),
            collection: default_collection(),
        }
    }
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".into()
}
fn default_qdrant_key_env() -> String {
    "QDRANT_API_KEY".into()
}
fn default_collection() -> String {
    "review_comments".into()
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration — merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum comments to collect per identity.
    pub comment_limit: usize,
    /// Maximum identities in an active stage at once.
    pub max_concurrent_tasks: usize,
    /// Pacing delay between successive admissions.
    pub admission_delay: Duration,
    /// Resume from previously persisted crawl/enrichment output.
    pub continue_previous: bool,
    /// Re-fetch everything, bypassing the seen-set.
    pub all_historical: bool,
    /// Vector store collection the embed stage upserts into.
    pub collection: String,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            comment_limit: config.defaults.comment_limit,
            max_concurrent_tasks: config.defaults.max_concurrent_tasks,
            admission_delay: Duration::from_millis(config.defaults.admission_delay_ms),
            continue_previous: true,
            all_historical: false,
            collection: config.qdrant.collection.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.reviewharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.reviewharvest/reviewharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HarvestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a required credential from the env var named in config.
pub fn required_env(var_name: &str, purpose: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(HarvestError::config(format!(
            "{purpose} not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Check that every credential a full pipeline run needs is present.
/// Called before any identity starts, so a missing key aborts the whole run.
pub fn validate_credentials(config: &AppConfig) -> Result<()> {
    required_env(&config.github.token_env, "forge API token")?;
    required_env(&config.openai.api_key_env, "enrichment API key")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("output_dir"));
        assert!(toml_str.contains("GITHUB_TOKEN"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.comment_limit, 200);
        assert_eq!(parsed.defaults.max_concurrent_tasks, 5);
        assert_eq!(parsed.github.token_env, "GITHUB_TOKEN");
    }

    #[test]
    fn config_with_identities() {
        let toml_str = r#"
[defaults]
output_dir = "/tmp/harvest"
prefer_offset = true

identities = ["alice", "bob"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.identities, vec!["alice", "bob"]);
        assert!(config.defaults.prefer_offset);
        assert_eq!(config.defaults.output_dir, "/tmp/harvest");
    }

    #[test]
    fn pipeline_config_from_app_config() {
        let app = AppConfig::default();
        let pipeline = PipelineConfig::from(&app);
        assert_eq!(pipeline.comment_limit, 200);
        assert_eq!(pipeline.max_concurrent_tasks, 5);
        assert_eq!(pipeline.admission_delay, Duration::from_millis(500));
        assert!(pipeline.continue_previous);
        assert!(!pipeline.all_historical);
    }

    #[test]
    fn credential_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.github.token_env = "RH_TEST_NONEXISTENT_TOKEN_12345".into();
        let result = validate_credentials(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("forge API token"));
    }
}
