//! Courier configuration.
//!
//! Same precedence as the intelligence service: defaults, then config
//! file, then environment, then CLI flags.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use pricedock_core::retry::RetryPolicy;

use super::cli::CliConfig;
use super::constants::{
    DEFAULT_CLEANUP_INTERVAL_H, DEFAULT_CLEANUP_TTL_H, DEFAULT_DOWNLOAD_TIMEOUT_S,
    DEFAULT_INTELLIGENCE_URL, DEFAULT_MAX_FILE_SIZE_MB, DEFAULT_MAX_RETRIES,
    DEFAULT_POLL_INTERVAL_S, DEFAULT_QUEUE_DEPTH_LIMIT, DEFAULT_RETRY_BACKOFF_BASE_S,
    DEFAULT_RETRY_BACKOFF_CAP_S, DEFAULT_RETRY_BACKOFF_FACTOR, DEFAULT_SHARED_ROOT,
    DEFAULT_STALL_TIMEOUT_S, DEFAULT_WORKER_COUNT, ENV_CLEANUP_INTERVAL_H, ENV_CLEANUP_TTL_H,
    ENV_DOWNLOAD_TIMEOUT_S, ENV_MAX_RETRIES, ENV_QUEUE_DEPTH_LIMIT, ENV_RETRY_BACKOFF_BASE_S,
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub shared_root: PathBuf,
    pub intelligence_url: String,
    pub max_file_size_bytes: u64,
    pub download_timeout: Duration,
    pub poll_interval: Duration,
    pub stall_timeout: Duration,
    pub cleanup_retention: Duration,
    pub cleanup_interval: Duration,
    pub retry: RetryPolicy,
    pub queue_depth_limit: u64,
    pub worker_count: usize,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileConfig {
    pub database_url: Option<String>,
    pub shared_root: Option<PathBuf>,
    pub intelligence_url: Option<String>,
    pub max_file_size_mb: Option<u64>,
    pub download_timeout_s: Option<u64>,
    pub poll_interval_s: Option<u64>,
    pub stall_timeout_s: Option<u64>,
    pub cleanup_ttl_h: Option<u64>,
    pub cleanup_interval_h: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_base_s: Option<u64>,
    pub queue_depth_limit: Option<u64>,
    pub worker_count: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        serde_json::from_str(&body)
            .with_context(|| format!("cannot parse config file {}", path.display()))
    }
}

fn env_parsed<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Ignoring unparseable environment variable");
            None
        }
    }
}

impl AppConfig {
    pub fn load(cli: &CliConfig) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        Ok(Self {
            database_url: cli
                .database_url
                .clone()
                .or(file.database_url)
                .context("database URL is required (PRICEDOCK_DATABASE_URL)")?,
            shared_root: cli
                .shared_root
                .clone()
                .or(file.shared_root)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SHARED_ROOT)),
            intelligence_url: cli
                .intelligence_url
                .clone()
                .or(file.intelligence_url)
                .unwrap_or_else(|| DEFAULT_INTELLIGENCE_URL.to_string()),
            max_file_size_bytes: cli
                .max_file_size_mb
                .or(file.max_file_size_mb)
                .unwrap_or(DEFAULT_MAX_FILE_SIZE_MB)
                * 1024
                * 1024,
            download_timeout: Duration::from_secs(
                env_parsed(ENV_DOWNLOAD_TIMEOUT_S)
                    .or(file.download_timeout_s)
                    .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_S),
            ),
            poll_interval: Duration::from_secs(
                cli.poll_interval_s
                    .or(file.poll_interval_s)
                    .unwrap_or(DEFAULT_POLL_INTERVAL_S)
                    .max(1),
            ),
            stall_timeout: Duration::from_secs(
                cli.stall_timeout_s
                    .or(file.stall_timeout_s)
                    .unwrap_or(DEFAULT_STALL_TIMEOUT_S),
            ),
            cleanup_retention: Duration::from_secs(
                env_parsed::<u64>(ENV_CLEANUP_TTL_H)
                    .or(file.cleanup_ttl_h)
                    .unwrap_or(DEFAULT_CLEANUP_TTL_H)
                    * 3_600,
            ),
            cleanup_interval: Duration::from_secs(
                env_parsed::<u64>(ENV_CLEANUP_INTERVAL_H)
                    .or(file.cleanup_interval_h)
                    .unwrap_or(DEFAULT_CLEANUP_INTERVAL_H)
                    .max(1)
                    * 3_600,
            ),
            retry: RetryPolicy::new(
                env_parsed(ENV_MAX_RETRIES)
                    .or(file.max_retries)
                    .unwrap_or(DEFAULT_MAX_RETRIES),
                Duration::from_secs(
                    env_parsed(ENV_RETRY_BACKOFF_BASE_S)
                        .or(file.retry_backoff_base_s)
                        .unwrap_or(DEFAULT_RETRY_BACKOFF_BASE_S),
                ),
                DEFAULT_RETRY_BACKOFF_FACTOR,
                Duration::from_secs(DEFAULT_RETRY_BACKOFF_CAP_S),
            ),
            queue_depth_limit: env_parsed(ENV_QUEUE_DEPTH_LIMIT)
                .or(file.queue_depth_limit)
                .unwrap_or(DEFAULT_QUEUE_DEPTH_LIMIT)
                .max(1),
            worker_count: cli
                .workers
                .or(file.worker_count)
                .unwrap_or(DEFAULT_WORKER_COUNT)
                .max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with_db() -> CliConfig {
        CliConfig {
            database_url: Some("postgres://localhost/pricedock".into()),
            ..CliConfig::default()
        }
    }

    #[test]
    fn test_defaults_resolve() {
        let config = AppConfig::load(&cli_with_db()).unwrap();
        assert_eq!(config.max_file_size_bytes, 50 * 1024 * 1024);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.stall_timeout, Duration::from_secs(1_800));
        assert_eq!(config.cleanup_retention, Duration::from_secs(24 * 3_600));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base, Duration::from_secs(30));
        assert_eq!(config.retry.cap, Duration::from_secs(600));
        assert_eq!(config.worker_count, 2);
    }

    #[test]
    fn test_missing_database_url_is_an_error() {
        assert!(AppConfig::load(&CliConfig::default()).is_err());
    }

    #[test]
    fn test_file_values_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.json");
        std::fs::write(
            &path,
            r#"{"max_file_size_mb": 10, "worker_count": 4, "poll_interval_s": 9}"#,
        )
        .unwrap();

        let cli = CliConfig {
            config: Some(path),
            ..cli_with_db()
        };
        let config = AppConfig::load(&cli).unwrap();
        assert_eq!(config.max_file_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.poll_interval, Duration::from_secs(9));
    }
}
