//! MNE Profiler CLI — enterprise profile reconciliation tool.
//!
//! Merges conflicting source records into reconciled profiles, recovers
//! missing figures from annual reports, and classifies activities into
//! NACE codes.

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
