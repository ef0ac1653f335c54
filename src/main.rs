mod app;
mod cli;
mod config;
mod provision;
mod runner;
mod training;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = cli::Cli::parse();

    // Every failure surfaces here and exits with status 1.
    if let Err(e) = cli::run(args).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
