//! docimport CLI: imports a local markdown tree into Feishu documents.
//!
//! Plans an ordered manifest from the tree (optionally following a table of
//! contents), then writes each directory group through a worker process.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
