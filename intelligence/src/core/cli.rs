use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::constants::{
    ENV_CONFIG, ENV_DATABASE_URL, ENV_EMBEDDING_MODEL, ENV_EXTRACTOR_CONCURRENCY, ENV_HOST,
    ENV_LLM_BASE_URL, ENV_LLM_MODEL, ENV_LLM_TEMPERATURE, ENV_MATCHING_ENABLED, ENV_PORT,
    ENV_SHARED_ROOT,
};

#[derive(Parser)]
#[command(name = "intelligence")]
#[command(version, about = "PriceDock semantic ETL service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// PostgreSQL connection URL
    #[arg(long, global = true, env = ENV_DATABASE_URL)]
    pub database_url: Option<String>,

    /// Shared staging root (must match the courier's)
    #[arg(long, global = true, env = ENV_SHARED_ROOT)]
    pub shared_root: Option<PathBuf>,

    /// LLM runtime base URL (OpenAI-compatible)
    #[arg(long, global = true, env = ENV_LLM_BASE_URL)]
    pub llm_base_url: Option<String>,

    /// Chat model used for extraction and adjudication
    #[arg(long, global = true, env = ENV_LLM_MODEL)]
    pub llm_model: Option<String>,

    /// Sampling temperature for extraction
    #[arg(long, global = true, env = ENV_LLM_TEMPERATURE)]
    pub llm_temperature: Option<f32>,

    /// Embedding model used by the matcher
    #[arg(long, global = true, env = ENV_EMBEDDING_MODEL)]
    pub embedding_model: Option<String>,

    /// Max parallel LLM calls per job
    #[arg(long, global = true, env = ENV_EXTRACTOR_CONCURRENCY)]
    pub extractor_concurrency: Option<usize>,

    /// Enable or disable the canonical-product matching stage
    #[arg(long, global = true, env = ENV_MATCHING_ENABLED)]
    pub matching: Option<bool>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the service (default command)
    Start,
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config: Option<PathBuf>,
    pub database_url: Option<String>,
    pub shared_root: Option<PathBuf>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub llm_temperature: Option<f32>,
    pub embedding_model: Option<String>,
    pub extractor_concurrency: Option<usize>,
    pub matching: Option<bool>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        config: cli.config,
        database_url: cli.database_url,
        shared_root: cli.shared_root,
        llm_base_url: cli.llm_base_url,
        llm_model: cli.llm_model,
        llm_temperature: cli.llm_temperature,
        embedding_model: cli.embedding_model,
        extractor_concurrency: cli.extractor_concurrency,
        matching: cli.matching,
    };
    (config, cli.command)
}
