//! CLI entry point for apiwallet.
//!
//! This binary provides the `apiwallet` command for storing provider API
//! keys and querying balances, models and availability.

mod cli;
mod commands;
mod config;
mod helpers;

use anyhow::Result;
use clap::Parser;

use crate::cli::Cli;
use crate::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    helpers::init_tracing("info", cli.log_json);

    let config = AppConfig::load(&cli.config)?;
    tracing::debug!(data_dir = %config.storage.data_dir.display(), "configuration loaded");

    commands::dispatch(cli.command, &config).await
}
