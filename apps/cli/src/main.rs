//! actorlens CLI — threat-actor catalog sync and technique enrichment.
//!
//! Synchronizes a threat-actor catalog into a local store and enriches each
//! actor with validated adversary technique identifiers.

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
