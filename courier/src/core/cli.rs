use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use super::constants::{
    ENV_CONFIG, ENV_DATABASE_URL, ENV_INTELLIGENCE_URL, ENV_MAX_FILE_SIZE_MB, ENV_POLL_INTERVAL_S,
    ENV_SHARED_ROOT, ENV_STALL_TIMEOUT_S, ENV_WORKER_COUNT,
};

#[derive(Parser)]
#[command(name = "courier")]
#[command(version, about = "PriceDock file acquisition service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// PostgreSQL connection URL
    #[arg(long, global = true, env = ENV_DATABASE_URL)]
    pub database_url: Option<String>,

    /// Shared staging root (must match intelligence's)
    #[arg(long, global = true, env = ENV_SHARED_ROOT)]
    pub shared_root: Option<PathBuf>,

    /// Base URL of the intelligence service
    #[arg(long, global = true, env = ENV_INTELLIGENCE_URL)]
    pub intelligence_url: Option<String>,

    /// Hard cap on downloaded file size, in megabytes
    #[arg(long, global = true, env = ENV_MAX_FILE_SIZE_MB)]
    pub max_file_size_mb: Option<u64>,

    /// Status poll cadence in seconds
    #[arg(long, global = true, env = ENV_POLL_INTERVAL_S)]
    pub poll_interval_s: Option<u64>,

    /// Seconds without analysis movement before a job is stalled
    #[arg(long, global = true, env = ENV_STALL_TIMEOUT_S)]
    pub stall_timeout_s: Option<u64>,

    /// Number of download workers
    #[arg(long, global = true, env = ENV_WORKER_COUNT)]
    pub workers: Option<usize>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Run the workers (default command)
    Start,
    /// Create a job for one supplier source and queue its download
    Enqueue {
        /// Supplier id
        #[arg(long)]
        supplier: Uuid,
        /// Source descriptor, `kind:location`
        /// (e.g. `pdf:https://supplier.example/prices.pdf`)
        #[arg(long)]
        source: String,
    },
    /// Re-enqueue a failed job, if its retry budget allows
    Retry {
        /// Job id
        #[arg(long)]
        job: Uuid,
    },
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub config: Option<PathBuf>,
    pub database_url: Option<String>,
    pub shared_root: Option<PathBuf>,
    pub intelligence_url: Option<String>,
    pub max_file_size_mb: Option<u64>,
    pub poll_interval_s: Option<u64>,
    pub stall_timeout_s: Option<u64>,
    pub workers: Option<usize>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        config: cli.config,
        database_url: cli.database_url,
        shared_root: cli.shared_root,
        intelligence_url: cli.intelligence_url,
        max_file_size_mb: cli.max_file_size_mb,
        poll_interval_s: cli.poll_interval_s,
        stall_timeout_s: cli.stall_timeout_s,
        workers: cli.workers,
    };
    (config, cli.command)
}
