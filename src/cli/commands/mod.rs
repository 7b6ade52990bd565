//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod efile;
mod filings;
mod init;
mod status;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use composer::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "compose")]
#[command(about = "Incremental IRS e-file index and per-organization composites")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run one incremental update of the e-file index and composites
    Efile {
        /// Working directory holding the index database and composites
        data_path: PathBuf,
        /// Bucket URL or local mirror directory
        #[arg(long, env = "COMPOSER_BUCKET_URL")]
        bucket: Option<String>,
        /// Tasks in flight per phase
        #[arg(short, long)]
        workers: Option<usize>,
        /// Keep fetched documents after the run
        #[arg(long)]
        keep_staging: bool,
        /// Do not show progress bars
        #[arg(short, long)]
        quiet: bool,
    },

    /// Initialize the working directory and database
    Init {
        /// Working directory to initialize
        data_path: PathBuf,
    },

    /// Show index counts for a working directory
    Status {
        /// Working directory holding the index database
        data_path: PathBuf,
    },

    /// List the latest filings recorded for an organization
    Filings {
        /// Working directory holding the index database
        data_path: PathBuf,
        /// Employer identification number
        ein: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    fn data_path(&self) -> &Path {
        match self {
            Commands::Efile { data_path, .. }
            | Commands::Init { data_path }
            | Commands::Status { data_path }
            | Commands::Filings { data_path, .. } => data_path,
        }
    }
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data: Some(cli.command.data_path().to_path_buf()),
    };
    let (mut settings, _config) = load_settings_with_options(options).await;

    match cli.command {
        Commands::Efile {
            bucket,
            workers,
            keep_staging,
            quiet,
            ..
        } => {
            if let Some(bucket) = bucket {
                settings.bucket = bucket;
            }
            if let Some(workers) = workers {
                settings.workers = workers.max(1);
            }
            settings.keep_staging |= keep_staging;
            efile::cmd_efile(&settings, !quiet).await
        }
        Commands::Init { .. } => init::cmd_init(&settings).await,
        Commands::Status { .. } => status::cmd_status(&settings).await,
        Commands::Filings { ein, json, .. } => filings::cmd_filings(&settings, &ein, json).await,
    }
}
