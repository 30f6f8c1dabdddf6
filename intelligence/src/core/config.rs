//! Service configuration.
//!
//! Precedence, lowest to highest: built-in defaults, JSON config file,
//! environment variables, CLI flags. Every knob of the ETL, the LLM
//! runtime and the matcher lives here; nothing reads the environment
//! after startup.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::cli::CliConfig;
use super::constants::{
    DEFAULT_CATEGORY_CACHE_TTL_S, DEFAULT_CHUNK_FAILURE_CEILING, DEFAULT_CHUNK_OVERLAP_ROWS,
    DEFAULT_CHUNK_SIZE_ROWS, DEFAULT_EMBEDDING_DIM, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_EXTRACTOR_CONCURRENCY, DEFAULT_EXTRACTOR_RETRY_ATTEMPTS, DEFAULT_FUZZY_MATCH_THRESHOLD,
    DEFAULT_HOST, DEFAULT_LATENCY_BACKOFF_THRESHOLD_MS, DEFAULT_LLM_BASE_URL, DEFAULT_LLM_MODEL,
    DEFAULT_LLM_SEED, DEFAULT_LLM_TEMPERATURE, DEFAULT_LLM_TIMEOUT_S, DEFAULT_MATCH_AUTO_THRESHOLD,
    DEFAULT_MATCH_KNN_K, DEFAULT_MATCH_REVIEW_THRESHOLD, DEFAULT_MATCHING_ENABLED,
    DEFAULT_MAX_CONCURRENT_ANALYSES, DEFAULT_MAX_FILE_SIZE_MB, DEFAULT_PARTIAL_SUCCESS_RATIO,
    DEFAULT_PERSIST_BATCH_SIZE, DEFAULT_PORT, DEFAULT_SHARED_ROOT, DEFAULT_STATUS_LOG_LIMIT,
    ENV_CATEGORY_CACHE_TTL_S, ENV_CHUNK_FAILURE_CEILING, ENV_CHUNK_OVERLAP_ROWS,
    ENV_CHUNK_SIZE_ROWS, ENV_EMBEDDING_DIM, ENV_EXTRACTOR_RETRY_ATTEMPTS,
    ENV_FUZZY_MATCH_THRESHOLD, ENV_LATENCY_BACKOFF_THRESHOLD_MS, ENV_LLM_API_KEY, ENV_LLM_SEED,
    ENV_LLM_TIMEOUT_S, ENV_MATCH_AUTO_THRESHOLD, ENV_MATCH_KNN_K, ENV_MATCH_REVIEW_THRESHOLD,
    ENV_MAX_CONCURRENT_ANALYSES, ENV_MAX_FILE_SIZE_MB, ENV_PARTIAL_SUCCESS_RATIO,
    ENV_PERSIST_BATCH_SIZE, ENV_STATUS_LOG_LIMIT,
};
use crate::domain::etl::extract::ExtractorConfig;
use crate::domain::etl::pipeline::PipelineConfig;
use crate::domain::etl::sheet::SheetSelector;
use crate::domain::matching::MatcherConfig;

// =============================================================================
// Resolved configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub seed: u64,
    pub timeout: Duration,
    pub embedding_model: String,
    pub embedding_dim: usize,
}

#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub chunk_size_rows: usize,
    pub chunk_overlap_rows: usize,
    pub fuzzy_match_threshold: u8,
    pub extractor_concurrency: usize,
    pub extractor_retry_attempts: u32,
    pub partial_success_ratio: f64,
    pub chunk_failure_ceiling: f64,
    pub persist_batch_size: usize,
    pub category_cache_ttl: Duration,
    pub status_log_limit: u32,
    pub max_concurrent_analyses: usize,
    pub latency_backoff_threshold: Duration,
    pub max_file_size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub enabled: bool,
    pub auto_threshold: f64,
    pub review_threshold: f64,
    pub knn_k: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub shared_root: PathBuf,
    pub llm: LlmConfig,
    pub etl: EtlConfig,
    pub matching: MatchingConfig,
}

// =============================================================================
// File config (JSON deserialization; all fields optional)
// =============================================================================

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct DatabaseFileConfig {
    pub url: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct LlmFileConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub seed: Option<u64>,
    pub timeout_s: Option<u64>,
    pub embedding_model: Option<String>,
    pub embedding_dim: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct EtlFileConfig {
    pub chunk_size_rows: Option<usize>,
    pub chunk_overlap_rows: Option<usize>,
    pub fuzzy_match_threshold: Option<u8>,
    pub extractor_concurrency: Option<usize>,
    pub extractor_retry_attempts: Option<u32>,
    pub partial_success_ratio: Option<f64>,
    pub chunk_failure_ceiling: Option<f64>,
    pub persist_batch_size: Option<usize>,
    pub category_cache_ttl_s: Option<u64>,
    pub status_log_limit: Option<u32>,
    pub max_concurrent_analyses: Option<usize>,
    pub latency_backoff_threshold_ms: Option<u64>,
    pub max_file_size_mb: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct MatchingFileConfig {
    pub enabled: Option<bool>,
    pub auto_threshold: Option<f64>,
    pub review_threshold: Option<f64>,
    pub knn_k: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub database: DatabaseFileConfig,
    pub shared_root: Option<PathBuf>,
    #[serde(default)]
    pub llm: LlmFileConfig,
    #[serde(default)]
    pub etl: EtlFileConfig,
    #[serde(default)]
    pub matching: MatchingFileConfig,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        serde_json::from_str(&body)
            .with_context(|| format!("cannot parse config file {}", path.display()))
    }
}

// =============================================================================
// Environment helpers
// =============================================================================

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

// =============================================================================
// Resolution
// =============================================================================

impl AppConfig {
    /// Merge defaults, config file, environment and CLI.
    pub fn load(cli: &CliConfig) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let server = ServerConfig {
            host: cli
                .host
                .clone()
                .or(file.server.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cli.port.or(file.server.port).unwrap_or(DEFAULT_PORT),
        };

        let database = DatabaseConfig {
            url: cli
                .database_url
                .clone()
                .or(file.database.url)
                .context("database URL is required (PRICEDOCK_DATABASE_URL)")?,
        };

        let shared_root = cli
            .shared_root
            .clone()
            .or(file.shared_root)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SHARED_ROOT));

        let llm = LlmConfig {
            base_url: cli
                .llm_base_url
                .clone()
                .or(file.llm.base_url)
                .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            api_key: std::env::var(ENV_LLM_API_KEY).ok().or(file.llm.api_key),
            model: cli
                .llm_model
                .clone()
                .or(file.llm.model)
                .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            temperature: cli
                .llm_temperature
                .or(file.llm.temperature)
                .unwrap_or(DEFAULT_LLM_TEMPERATURE),
            seed: env_parsed(ENV_LLM_SEED)
                .or(file.llm.seed)
                .unwrap_or(DEFAULT_LLM_SEED),
            timeout: Duration::from_secs(
                env_parsed(ENV_LLM_TIMEOUT_S)
                    .or(file.llm.timeout_s)
                    .unwrap_or(DEFAULT_LLM_TIMEOUT_S),
            ),
            embedding_model: cli
                .embedding_model
                .clone()
                .or(file.llm.embedding_model)
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            embedding_dim: env_parsed(ENV_EMBEDDING_DIM)
                .or(file.llm.embedding_dim)
                .unwrap_or(DEFAULT_EMBEDDING_DIM),
        };

        let etl = EtlConfig {
            chunk_size_rows: env_parsed(ENV_CHUNK_SIZE_ROWS)
                .or(file.etl.chunk_size_rows)
                .unwrap_or(DEFAULT_CHUNK_SIZE_ROWS)
                .max(1),
            chunk_overlap_rows: env_parsed(ENV_CHUNK_OVERLAP_ROWS)
                .or(file.etl.chunk_overlap_rows)
                .unwrap_or(DEFAULT_CHUNK_OVERLAP_ROWS),
            fuzzy_match_threshold: env_parsed(ENV_FUZZY_MATCH_THRESHOLD)
                .or(file.etl.fuzzy_match_threshold)
                .unwrap_or(DEFAULT_FUZZY_MATCH_THRESHOLD)
                .min(100),
            extractor_concurrency: cli
                .extractor_concurrency
                .or(file.etl.extractor_concurrency)
                .unwrap_or(DEFAULT_EXTRACTOR_CONCURRENCY)
                .max(1),
            extractor_retry_attempts: env_parsed(ENV_EXTRACTOR_RETRY_ATTEMPTS)
                .or(file.etl.extractor_retry_attempts)
                .unwrap_or(DEFAULT_EXTRACTOR_RETRY_ATTEMPTS),
            partial_success_ratio: env_parsed(ENV_PARTIAL_SUCCESS_RATIO)
                .or(file.etl.partial_success_ratio)
                .unwrap_or(DEFAULT_PARTIAL_SUCCESS_RATIO)
                .clamp(0.0, 1.0),
            chunk_failure_ceiling: env_parsed(ENV_CHUNK_FAILURE_CEILING)
                .or(file.etl.chunk_failure_ceiling)
                .unwrap_or(DEFAULT_CHUNK_FAILURE_CEILING)
                .clamp(0.0, 1.0),
            persist_batch_size: env_parsed(ENV_PERSIST_BATCH_SIZE)
                .or(file.etl.persist_batch_size)
                .unwrap_or(DEFAULT_PERSIST_BATCH_SIZE)
                .max(1),
            category_cache_ttl: Duration::from_secs(
                env_parsed(ENV_CATEGORY_CACHE_TTL_S)
                    .or(file.etl.category_cache_ttl_s)
                    .unwrap_or(DEFAULT_CATEGORY_CACHE_TTL_S),
            ),
            status_log_limit: env_parsed(ENV_STATUS_LOG_LIMIT)
                .or(file.etl.status_log_limit)
                .unwrap_or(DEFAULT_STATUS_LOG_LIMIT),
            max_concurrent_analyses: env_parsed(ENV_MAX_CONCURRENT_ANALYSES)
                .or(file.etl.max_concurrent_analyses)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_ANALYSES)
                .max(1),
            latency_backoff_threshold: Duration::from_millis(
                env_parsed(ENV_LATENCY_BACKOFF_THRESHOLD_MS)
                    .or(file.etl.latency_backoff_threshold_ms)
                    .unwrap_or(DEFAULT_LATENCY_BACKOFF_THRESHOLD_MS),
            ),
            max_file_size_bytes: env_parsed::<u64>(ENV_MAX_FILE_SIZE_MB)
                .or(file.etl.max_file_size_mb)
                .unwrap_or(DEFAULT_MAX_FILE_SIZE_MB)
                * 1024
                * 1024,
        };

        let matching = MatchingConfig {
            enabled: cli
                .matching
                .or(file.matching.enabled)
                .unwrap_or(DEFAULT_MATCHING_ENABLED),
            auto_threshold: env_parsed(ENV_MATCH_AUTO_THRESHOLD)
                .or(file.matching.auto_threshold)
                .unwrap_or(DEFAULT_MATCH_AUTO_THRESHOLD)
                .clamp(0.0, 1.0),
            review_threshold: env_parsed(ENV_MATCH_REVIEW_THRESHOLD)
                .or(file.matching.review_threshold)
                .unwrap_or(DEFAULT_MATCH_REVIEW_THRESHOLD)
                .clamp(0.0, 1.0),
            knn_k: env_parsed(ENV_MATCH_KNN_K)
                .or(file.matching.knn_k)
                .unwrap_or(DEFAULT_MATCH_KNN_K)
                .max(1),
        };

        Ok(Self {
            server,
            database,
            shared_root,
            llm,
            etl,
            matching,
        })
    }

    /// Pipeline view of the resolved config.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            chunk_size_rows: self.etl.chunk_size_rows,
            chunk_overlap_rows: self.etl.chunk_overlap_rows,
            fuzzy_match_threshold: self.etl.fuzzy_match_threshold,
            extractor: ExtractorConfig {
                temperature: self.llm.temperature,
                seed: Some(self.llm.seed),
                retry_attempts: self.etl.extractor_retry_attempts,
                chunk_timeout: self.llm.timeout,
                concurrency: self.etl.extractor_concurrency,
                latency_backoff_threshold: self.etl.latency_backoff_threshold,
            },
            selector: SheetSelector::default(),
            partial_success_ratio: self.etl.partial_success_ratio,
            chunk_failure_ceiling: self.etl.chunk_failure_ceiling,
            persist_batch_size: self.etl.persist_batch_size,
            matcher: MatcherConfig {
                auto_threshold: self.matching.auto_threshold,
                review_threshold: self.matching.review_threshold,
                knn_k: self.matching.knn_k,
            },
            matching_enabled: self.matching.enabled,
        }
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
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.etl.chunk_size_rows, 250);
        assert_eq!(config.etl.chunk_overlap_rows, 40);
        assert_eq!(config.etl.fuzzy_match_threshold, 85);
        assert_eq!(config.matching.auto_threshold, 0.90);
        assert_eq!(config.llm.embedding_dim, 768);
        assert_eq!(config.etl.max_file_size_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn test_missing_database_url_is_an_error() {
        let result = AppConfig::load(&CliConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_overrides_file_defaults() {
        let cli = CliConfig {
            port: Some(9999),
            llm_temperature: Some(0.7),
            extractor_concurrency: Some(8),
            ..cli_with_db()
        };
        let config = AppConfig::load(&cli).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.llm.temperature, 0.7);
        assert_eq!(config.etl.extractor_concurrency, 8);
    }

    #[test]
    fn test_file_config_parses_partial_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intelligence.json");
        std::fs::write(
            &path,
            r#"{"etl": {"chunk_size_rows": 100}, "matching": {"enabled": false}}"#,
        )
        .unwrap();

        let cli = CliConfig {
            config: Some(path),
            ..cli_with_db()
        };
        let config = AppConfig::load(&cli).unwrap();
        assert_eq!(config.etl.chunk_size_rows, 100);
        assert!(!config.matching.enabled);
        // Untouched sections keep defaults.
        assert_eq!(config.etl.persist_batch_size, 100);
    }

    #[test]
    fn test_pipeline_config_mirrors_knobs() {
        let config = AppConfig::load(&cli_with_db()).unwrap();
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.chunk_size_rows, config.etl.chunk_size_rows);
        assert_eq!(pipeline.extractor.temperature, config.llm.temperature);
        assert_eq!(pipeline.matcher.knn_k, config.matching.knn_k);
    }
}
