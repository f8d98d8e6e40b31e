//! TreeSync CLI
//!
//! Command-line tools for exercising the sync engine.
//!
//! # Commands
//!
//! - `run` - Execute a scenario file and print the events each step raised
//! - `verify` - Check scenario expectations, exiting non-zero on any mismatch
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// TreeSync command-line engine tools.
#[derive(Parser)]
#[command(name = "treesync")]
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
    /// Execute a scenario file and print the events each step raised
    Run {
        /// The scenario file to execute
        file: PathBuf,

        /// Re-base every scenario path under this prefix
        #[arg(short, long)]
        rebase: Option<String>,
    },

    /// Check scenario expectations; with no files, verify the bundled corpus
    Verify {
        /// Scenario files to verify
        files: Vec<PathBuf>,

        /// Re-base every scenario path under this prefix
        #[arg(short, long)]
        rebase: Option<String>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run { file, rebase } => {
            commands::run::run(&file, rebase.as_deref())?;
        }
        Commands::Verify { files, rebase } => {
            commands::verify::run(&files, rebase.as_deref())?;
        }
        Commands::Version => {
            println!("TreeSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
