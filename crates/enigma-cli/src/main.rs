//! CLI entry point for the enigma bot.
//!
//! This binary provides the `enigma` command: `enigma run` starts the
//! Telegram bot, `enigma check` loads the spreadsheet and prints a summary.

mod bot;
mod cli;
mod config;
mod helpers;
mod telegram;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::helpers::{init_tracing, load_dotenv};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing("info");
    load_dotenv();
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Run { poll_timeout } => bot::cmd_run(config, poll_timeout).await,
        Commands::Check => bot::cmd_check(config).await,
    }
}
