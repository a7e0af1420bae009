//! Sourcing CLI: discover local businesses, enrich them, and score them for
//! acquisition suitability.
//!
//! Everything is persisted to a local libSQL database, so any command can be
//! interrupted and re-run.

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
