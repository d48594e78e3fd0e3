//! Photoblog CLI: turn new photos into a published blog post.
//!
//! Picks unprocessed photos from Drive or a local folder, drafts a post with
//! an AI model, writes it into a git-backed blog and pushes it.

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
