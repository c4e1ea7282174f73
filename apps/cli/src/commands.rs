//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use reviewharvest_collector::{CollectOptions, CollectOutcome, CommentCollector};
use reviewharvest_core::{
    ChatEnricher, HarvestStages, OrchestratorOptions, PipelineOrchestrator, VectorUploader,
};
use reviewharvest_discovery::DiscoveryClient;
use reviewharvest_shared::{
    AppConfig, Candidate, Identity, PipelineConfig, init_config, load_config, required_env,
    validate_credentials,
};
use reviewharvest_source::{CursorAdapter, OffsetAdapter, SourceAdapter};
use reviewharvest_store::ArtifactStore;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ReviewHarvest — harvest, classify and embed code-review comments.
#[derive(Parser)]
#[command(
    name = "reviewharvest",
    version,
    about = "Crawl pull-request review comments, classify them, and embed them into a vector store.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the full pipeline for a domain: resolve identities, then
    /// collect, enrich and embed each one.
    Run {
        /// Domain tag the run is scoped to (e.g. a language).
        domain: String,

        /// Identity to process (repeatable). Overrides the identity file
        /// and discovery.
        #[arg(short, long = "identity")]
        identities: Vec<String>,

        /// File listing identities: a JSON array of candidate objects or
        /// one login per line.
        #[arg(long)]
        identity_file: Option<PathBuf>,

        /// Maximum comments to collect per identity.
        #[arg(long)]
        limit: Option<usize>,

        /// Maximum identities in an active stage at once.
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Vector store collection to upsert into.
        #[arg(long)]
        collection: Option<String>,

        /// Output directory for artifacts.
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Start fresh instead of resuming persisted progress.
        #[arg(long)]
        no_continue: bool,

        /// Re-fetch everything, bypassing previously collected comments.
        #[arg(long)]
        all_historical: bool,

        /// Use the REST transport as primary instead of GraphQL.
        #[arg(long)]
        prefer_offset: bool,

        /// Candidates to request from discovery when no identities are
        /// given.
        #[arg(long, default_value = "10")]
        max_candidates: usize,
    },

    /// Collect comments for a single identity, without enrichment or
    /// embedding.
    Collect {
        /// Identity to crawl.
        identity: String,

        /// Maximum comments to collect.
        #[arg(long)]
        limit: Option<usize>,

        /// Output directory for artifacts.
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Start fresh instead of resuming persisted progress.
        #[arg(long)]
        no_continue: bool,

        /// Re-fetch everything, bypassing previously collected comments.
        #[arg(long)]
        all_historical: bool,

        /// Use the REST transport as primary instead of GraphQL.
        #[arg(long)]
        prefer_offset: bool,
    },

    /// Print ranked candidate identities for a domain.
    Discover {
        /// Domain tag to search (e.g. a language).
        domain: String,

        /// Maximum candidates to print.
        #[arg(long, default_value = "10")]
        max_candidates: usize,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "reviewharvest=info",
        1 => "reviewharvest=debug",
        _ => "reviewharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            domain,
            identities,
            identity_file,
            limit,
            max_concurrent,
            collection,
            output_dir,
            no_continue,
            all_historical,
            prefer_offset,
            max_candidates,
        } => {
            cmd_run(RunArgs {
                domain,
                identities,
                identity_file,
                limit,
                max_concurrent,
                collection,
                output_dir,
                no_continue,
                all_historical,
                prefer_offset,
                max_candidates,
            })
            .await
        }
        Command::Collect {
            identity,
            limit,
            output_dir,
            no_continue,
            all_historical,
            prefer_offset,
        } => {
            cmd_collect(
                &identity,
                limit,
                output_dir,
                no_continue,
                all_historical,
                prefer_offset,
            )
            .await
        }
        Command::Discover {
            domain,
            max_candidates,
        } => cmd_discover(&domain, max_candidates).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

struct RunArgs {
    domain: String,
    identities: Vec<String>,
    identity_file: Option<PathBuf>,
    limit: Option<usize>,
    max_concurrent: Option<usize>,
    collection: Option<String>,
    output_dir: Option<PathBuf>,
    no_continue: bool,
    all_historical: bool,
    prefer_offset: bool,
    max_candidates: usize,
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let config = load_config()?;
    validate_credentials(&config)?;

    let mut pipeline = PipelineConfig::from(&config);
    if let Some(limit) = args.limit {
        pipeline.comment_limit = limit;
    }
    if let Some(max) = args.max_concurrent {
        pipeline.max_concurrent_tasks = max;
    }
    if let Some(collection) = args.collection {
        pipeline.collection = collection;
    }
    pipeline.continue_previous = !args.no_continue;
    pipeline.all_historical = args.all_historical;

    let identities =
        resolve_identities(&config, &args.domain, &args.identities, args.identity_file.as_deref(), args.max_candidates)
            .await?;
    if identities.is_empty() {
        return Err(eyre!("no identities to process for domain '{}'", args.domain));
    }

    let output_dir = args
        .output_dir
        .unwrap_or_else(|| PathBuf::from(&config.defaults.output_dir));
    let store = ArtifactStore::open(&output_dir)?;

    let prefer_offset = args.prefer_offset || config.defaults.prefer_offset;
    let collector = build_collector(&config, prefer_offset, store.clone())?;

    let openai_key = required_env(&config.openai.api_key_env, "enrichment API key")?;
    let enricher = ChatEnricher::new(&config.openai.api_base, &openai_key, &config.openai.model)?;
    let qdrant_key = std::env::var(&config.qdrant.api_key_env).ok();
    let embedder = VectorUploader::new(
        &config.openai.api_base,
        &openai_key,
        &config.openai.embedding_model,
        &config.qdrant.url,
        qdrant_key,
    )?;

    let stages = HarvestStages::new(
        collector,
        Box::new(enricher),
        Box::new(embedder),
        store.clone(),
        CollectOptions {
            limit: pipeline.comment_limit,
            continue_previous: pipeline.continue_previous,
            all_historical: pipeline.all_historical,
        },
        pipeline.collection.clone(),
    );

    info!(
        domain = %args.domain,
        identities = identities.len(),
        max_concurrent = pipeline.max_concurrent_tasks,
        "starting pipeline"
    );

    let spinner = pipeline_spinner(&format!(
        "Processing {} identities for '{}'",
        identities.len(),
        args.domain
    ));

    let orchestrator =
        PipelineOrchestrator::new(stages, OrchestratorOptions::from(&pipeline));
    let summary = orchestrator.run(&args.domain, identities).await;
    let summary_path = store.write_summary(&summary)?;

    spinner.finish_and_clear();

    println!();
    println!("  Pipeline run complete");
    println!("  Domain:     {}", summary.domain);
    println!("  Succeeded:  {}", summary.identities_succeeded);
    println!("  Failed:     {}", summary.identities_failed);
    println!("  Comments:   {}", summary.total_comments);
    for failure in &summary.failed {
        println!("    {} — {}", failure.login, failure.reason);
    }
    println!("  Summary:    {}", summary_path.display());
    println!();

    Ok(())
}

/// Identity list sources, in priority order: explicit flags, the identity
/// file, then discovery.
async fn resolve_identities(
    config: &AppConfig,
    domain: &str,
    flags: &[String],
    file: Option<&std::path::Path>,
    max_candidates: usize,
) -> Result<Vec<Identity>> {
    if !flags.is_empty() {
        return Ok(flags.iter().map(Identity::new).collect());
    }

    if let Some(path) = file {
        return parse_identity_file(path);
    }

    if !config.identities.is_empty() {
        return Ok(config.identities.iter().map(Identity::new).collect());
    }

    info!(domain, "no identities configured, falling back to discovery");
    let token = required_env(&config.github.token_env, "forge API token")?;
    let client = DiscoveryClient::new(&config.github.rest_base, token)?;
    let candidates = client.find_candidates(domain, max_candidates).await?;
    Ok(candidates
        .into_iter()
        .map(|c| Identity::new(c.login))
        .collect())
}

/// Parse an identity file: a JSON array of candidate objects, or one
/// login per line.
fn parse_identity_file(path: &std::path::Path) -> Result<Vec<Identity>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| eyre!("cannot read identity file '{}': {e}", path.display()))?;

    if let Ok(candidates) = serde_json::from_str::<Vec<Candidate>>(&content) {
        return Ok(candidates
            .into_iter()
            .map(|c| Identity::new(c.login))
            .collect());
    }

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(Identity::new)
        .collect())
}

/// Build the collector with the configured transports. GraphQL cursor
/// pagination is primary unless `--prefer-offset` flips the order.
fn build_collector(
    config: &AppConfig,
    prefer_offset: bool,
    store: ArtifactStore,
) -> Result<CommentCollector> {
    let token = required_env(&config.github.token_env, "forge API token")?;

    let cursor: Box<dyn SourceAdapter> =
        Box::new(CursorAdapter::new(&config.github.graphql_url, token.clone())?);
    let offset: Box<dyn SourceAdapter> =
        Box::new(OffsetAdapter::new(&config.github.rest_base, token)?);

    let (primary, secondary) = if prefer_offset {
        (offset, cursor)
    } else {
        (cursor, offset)
    };

    Ok(CommentCollector::new(primary, Some(secondary), store))
}

fn pipeline_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner.set_message(message.to_string());
    spinner
}

// ---------------------------------------------------------------------------
// collect
// ---------------------------------------------------------------------------

async fn cmd_collect(
    identity: &str,
    limit: Option<usize>,
    output_dir: Option<PathBuf>,
    no_continue: bool,
    all_historical: bool,
    prefer_offset: bool,
) -> Result<()> {
    let config = load_config()?;

    let output_dir = output_dir.unwrap_or_else(|| PathBuf::from(&config.defaults.output_dir));
    let store = ArtifactStore::open(&output_dir)?;
    let collector =
        build_collector(&config, prefer_offset || config.defaults.prefer_offset, store)?;

    let identity = Identity::new(identity);
    let options = CollectOptions {
        limit: limit.unwrap_or(config.defaults.comment_limit),
        continue_previous: !no_continue,
        all_historical,
    };

    info!(identity = %identity, limit = options.limit, "collecting comments");

    match collector.collect(&identity, &options).await? {
        CollectOutcome::Collected(report) => {
            println!();
            println!("  Collected {} comments for {identity}", report.comments.len());
            println!("  Pages fetched: {}", report.pages_fetched);
            if report.failed_over {
                println!("  Primary transport was throttled; finished on the fallback.");
            }
            println!("  Artifact: {}", report.artifact_path.display());
            println!();
        }
        CollectOutcome::Empty => {
            println!("No comments found for {identity}.");
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// discover
// ---------------------------------------------------------------------------

async fn cmd_discover(domain: &str, max_candidates: usize) -> Result<()> {
    let config = load_config()?;
    let token = required_env(&config.github.token_env, "forge API token")?;

    let client = DiscoveryClient::new(&config.github.rest_base, token)?;
    let candidates = client.find_candidates(domain, max_candidates).await?;

    if candidates.is_empty() {
        println!("No candidates found for '{domain}'.");
        return Ok(());
    }

    println!();
    println!("  Candidates for '{domain}':");
    for (i, candidate) in candidates.iter().enumerate() {
        println!("  {:>3}. {:<24} {:.2}", i + 1, candidate.login, candidate.score);
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
