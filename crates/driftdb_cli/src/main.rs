//! DriftDB CLI
//!
//! Command-line tools for DriftDB database files.
//!
//! # Commands
//!
//! - `inspect` - Display objects per class and sync progress
//! - `reset` - Move a database file aside after a client reset

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// DriftDB command-line database tools.
#[derive(Parser)]
#[command(name = "driftdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display classes, object counts and unsynced changesets
    Inspect {
        /// Path to the database file
        path: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Execute a manual client reset on a closed database file
    Reset {
        /// Path to the database file
        #[arg(long)]
        original: PathBuf,

        /// Where to move the file (defaults to the `recovered/` directory
        /// next to it)
        #[arg(long)]
        recovery: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { path, format } => {
            commands::inspect::run(&path, &format)?;
        }
        Commands::Reset { original, recovery } => {
            commands::reset::run(&original, recovery.as_deref())?;
        }
        Commands::Version => {
            println!("DriftDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("DriftDB Core v{}", driftdb_core::VERSION);
        }
    }

    Ok(())
}
