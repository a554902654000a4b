//! CLI argument definitions.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Enigma bot -- puzzles over Telegram, stored in a spreadsheet.
#[derive(Parser)]
#[command(
    name = "enigma",
    version,
    about = "Enigma bot -- puzzles over Telegram, stored in a spreadsheet"
)]
pub struct Cli {
    /// Path of the TOML configuration file.
    #[arg(long, short, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the Telegram bot (long polling).
    Run {
        /// Override `[bot] poll_timeout_secs`.
        #[arg(long)]
        poll_timeout: Option<u64>,
    },

    /// Load every table once and print a summary.
    Check,
}
