//! # Flint CLI
//!
//! Command-line driver for the Flint indexing pipeline.
//!
//! ## Commands
//!
//! - `flint index <folder>` - Index a folder into an in-memory index and report the outcome
//! - `flint translate <file>` - Print the canonical document stream of one file
//! - `flint config` - Show the effective configuration or write the defaults
//!
//! ## Example Usage
//!
//! ```bash
//! # Index every XML file of a folder with 4 worker threads
//! flint index ./docs --include "*.xml" --threads 4
//!
//! # Same, as JSON
//! flint index ./docs -o json
//!
//! # See what a file turns into
//! flint translate ./docs/report.xml
//! ```

mod app;
mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Flint - Content indexing pipeline
#[derive(Parser)]
#[command(name = "flint")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a folder into an in-memory index
    Index {
        /// Folder to index
        root: PathBuf,

        /// Index name (defaults to the folder name)
        #[arg(short, long)]
        name: Option<String>,

        /// Number of worker threads
        #[arg(short, long)]
        threads: Option<usize>,

        /// Process jobs one at a time, in queue order
        #[arg(short, long)]
        single_thread: bool,

        /// File name globs to index (can be used multiple times)
        #[arg(short, long)]
        include: Vec<String>,

        /// Directory globs to skip (can be used multiple times)
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Submit jobs with high priority
        #[arg(long)]
        high_priority: bool,

        /// Seconds to wait for the batch to finish
        #[arg(long, default_value = "300")]
        wait: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        output: OutputFormat,
    },

    /// Print the canonical document stream of a file
    Translate {
        /// File to translate
        file: PathBuf,

        /// Translation parameters as name=value (can be used multiple times)
        #[arg(short, long)]
        param: Vec<String>,
    },

    /// Show the effective configuration
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => flint_core::Config::default_config_path()?,
    };
    let config = flint_core::Config::load_from(&config_path)?;

    // Setup logging
    let log_level = if cli.quiet {
        "error".to_string()
    } else {
        match cli.verbose {
            0 => config.general.log_level.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)))
        .init();

    // Execute command
    match cli.command {
        Commands::Index {
            root,
            name,
            threads,
            single_thread,
            include,
            exclude,
            high_priority,
            wait,
            output,
        } => commands::index::run(
            config,
            commands::index::IndexOptions {
                root,
                name,
                threads,
                single_thread,
                include,
                exclude,
                high_priority,
                wait,
                output,
            },
        ),
        Commands::Translate { file, param } => commands::translate::run(config, &file, &param),
        Commands::Config { init, force } => commands::config::run(&config, &config_path, init, force),
    }
}
