//! ReviewHarvest CLI — harvest, classify and embed code-review comments.
//!
//! Crawls pull-request review comments for a set of identities, enriches
//! them with a classification model, and uploads embeddings to a vector
//! store for later retrieval.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
