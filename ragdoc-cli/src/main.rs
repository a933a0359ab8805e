mod cli;
mod commands;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::commands::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the environment may already be set.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_filter = if cli.global.verbose { "info,ragdoc=debug" } else { "info,ragdoc=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = || Settings::from_args(&cli.global).context("invalid configuration");

    match cli.command {
        Command::Ingest { dir, mode, chunking, text } => {
            let settings = settings()?.with_chunking(&chunking, mode)?;
            commands::ingest(&settings, &dir, text).await
        }
        Command::Query { question, retrieval, json } => {
            let settings = settings()?.with_retrieval(&retrieval)?;
            commands::query(&settings, &question, json).await
        }
        Command::Chat { retrieval } => {
            let settings = settings()?.with_retrieval(&retrieval)?;
            commands::chat(&settings).await
        }
        Command::Serve { host, port, dir, text, ingest, retrieval } => {
            let settings = settings()?.with_retrieval(&retrieval)?;
            commands::serve(&settings, host, port, &dir, text, ingest).await
        }
        Command::Models { limit } => commands::models(limit).await,
    }
}
