//! Binary crate for the `rainsoon` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Logging setup (stderr only; stdout carries MCP traffic)
//! - Interactive configuration

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cmd = cli::Cli::parse();
    let code = cmd.run().await?;
    std::process::exit(code);
}
