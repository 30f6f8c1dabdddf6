// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case
pub const APP_NAME: &str = "PriceDock Intelligence";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "pricedock-intelligence";

// =============================================================================
// Configuration Files
// =============================================================================

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "PRICEDOCK_INTELLIGENCE_CONFIG";

// =============================================================================
// Environment Variables - Server
// =============================================================================

pub const ENV_HOST: &str = "PRICEDOCK_INTELLIGENCE_HOST";
pub const ENV_PORT: &str = "PRICEDOCK_INTELLIGENCE_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "PRICEDOCK_LOG";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 7410;

// =============================================================================
// Environment Variables - Database & Storage
// =============================================================================

pub const ENV_DATABASE_URL: &str = "PRICEDOCK_DATABASE_URL";
pub const ENV_SHARED_ROOT: &str = "PRICEDOCK_SHARED_ROOT";

pub const DEFAULT_SHARED_ROOT: &str = "/var/lib/pricedock/staging";

// =============================================================================
// Environment Variables - LLM runtime
// =============================================================================

pub const ENV_LLM_BASE_URL: &str = "PRICEDOCK_LLM_BASE_URL";
pub const ENV_LLM_API_KEY: &str = "PRICEDOCK_LLM_API_KEY";
pub const ENV_LLM_MODEL: &str = "PRICEDOCK_LLM_MODEL";
pub const ENV_LLM_TEMPERATURE: &str = "PRICEDOCK_LLM_TEMPERATURE";
pub const ENV_LLM_SEED: &str = "PRICEDOCK_LLM_SEED";
pub const ENV_LLM_TIMEOUT_S: &str = "PRICEDOCK_LLM_TIMEOUT_S";
pub const ENV_EMBEDDING_MODEL: &str = "PRICEDOCK_EMBEDDING_MODEL";
pub const ENV_EMBEDDING_DIM: &str = "PRICEDOCK_EMBEDDING_DIM";

pub const DEFAULT_LLM_BASE_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_LLM_MODEL: &str = "qwen2.5:32b-instruct";
pub const DEFAULT_LLM_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_LLM_SEED: u64 = 7;
pub const DEFAULT_LLM_TIMEOUT_S: u64 = 60;
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_EMBEDDING_DIM: usize = 768;

// =============================================================================
// Environment Variables - ETL
// =============================================================================

pub const ENV_CHUNK_SIZE_ROWS: &str = "PRICEDOCK_CHUNK_SIZE_ROWS";
pub const ENV_CHUNK_OVERLAP_ROWS: &str = "PRICEDOCK_CHUNK_OVERLAP_ROWS";
pub const ENV_FUZZY_MATCH_THRESHOLD: &str = "PRICEDOCK_FUZZY_MATCH_THRESHOLD";
pub const ENV_EXTRACTOR_CONCURRENCY: &str = "PRICEDOCK_EXTRACTOR_CONCURRENCY";
pub const ENV_EXTRACTOR_RETRY_ATTEMPTS: &str = "PRICEDOCK_EXTRACTOR_RETRY_ATTEMPTS";
pub const ENV_PARTIAL_SUCCESS_RATIO: &str = "PRICEDOCK_PARTIAL_SUCCESS_RATIO";
pub const ENV_CHUNK_FAILURE_CEILING: &str = "PRICEDOCK_CHUNK_FAILURE_CEILING";
pub const ENV_PERSIST_BATCH_SIZE: &str = "PRICEDOCK_PERSIST_BATCH_SIZE";
pub const ENV_CATEGORY_CACHE_TTL_S: &str = "PRICEDOCK_CATEGORY_CACHE_TTL_S";
pub const ENV_STATUS_LOG_LIMIT: &str = "PRICEDOCK_STATUS_LOG_LIMIT";
pub const ENV_MAX_CONCURRENT_ANALYSES: &str = "PRICEDOCK_MAX_CONCURRENT_ANALYSES";
pub const ENV_LATENCY_BACKOFF_THRESHOLD_MS: &str = "PRICEDOCK_LATENCY_BACKOFF_THRESHOLD_MS";
pub const ENV_MAX_FILE_SIZE_MB: &str = "PRICEDOCK_MAX_FILE_SIZE_MB";

pub const DEFAULT_CHUNK_SIZE_ROWS: usize = 250;
pub const DEFAULT_CHUNK_OVERLAP_ROWS: usize = 40;
pub const DEFAULT_FUZZY_MATCH_THRESHOLD: u8 = 85;
pub const DEFAULT_EXTRACTOR_CONCURRENCY: usize = 2;
pub const DEFAULT_EXTRACTOR_RETRY_ATTEMPTS: u32 = 2;
pub const DEFAULT_PARTIAL_SUCCESS_RATIO: f64 = 0.80;
pub const DEFAULT_CHUNK_FAILURE_CEILING: f64 = 0.50;
pub const DEFAULT_PERSIST_BATCH_SIZE: usize = 100;
pub const DEFAULT_CATEGORY_CACHE_TTL_S: u64 = 300;
pub const DEFAULT_STATUS_LOG_LIMIT: u32 = 50;
pub const DEFAULT_MAX_CONCURRENT_ANALYSES: usize = 4;
pub const DEFAULT_LATENCY_BACKOFF_THRESHOLD_MS: u64 = 8_000;
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 50;

// =============================================================================
// Environment Variables - Matching
// =============================================================================

pub const ENV_MATCHING_ENABLED: &str = "PRICEDOCK_MATCHING_ENABLED";
pub const ENV_MATCH_AUTO_THRESHOLD: &str = "PRICEDOCK_MATCH_AUTO_THRESHOLD";
pub const ENV_MATCH_REVIEW_THRESHOLD: &str = "PRICEDOCK_MATCH_REVIEW_THRESHOLD";
pub const ENV_MATCH_KNN_K: &str = "PRICEDOCK_MATCH_KNN_K";

pub const DEFAULT_MATCHING_ENABLED: bool = true;
pub const DEFAULT_MATCH_AUTO_THRESHOLD: f64 = 0.90;
pub const DEFAULT_MATCH_REVIEW_THRESHOLD: f64 = 0.70;
pub const DEFAULT_MATCH_KNN_K: u32 = 5;
