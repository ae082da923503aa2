//! CLI argument definitions using clap
//!
//! Commands:
//! - aerostore run --script <path> [--config <path>]
//! - aerostore cmp <a> <b>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// aerostore - transactional object store coordinator
#[derive(Parser, Debug)]
#[command(name = "aerostore")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a JSON script against an in-memory database
    Run {
        /// Path to the script file
        #[arg(long)]
        script: PathBuf,

        /// Path to configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Compare two JSON-encoded keys
    Cmp {
        /// First key, as JSON
        a: String,

        /// Second key, as JSON
        b: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
