// =============================================================================
// Application Identity
// =============================================================================

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "pricedock-courier";

// =============================================================================
// Configuration Files
// =============================================================================

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "PRICEDOCK_COURIER_CONFIG";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "PRICEDOCK_LOG";

// =============================================================================
// Environment Variables - Database & Storage
// =============================================================================

pub const ENV_DATABASE_URL: &str = "PRICEDOCK_DATABASE_URL";
pub const ENV_SHARED_ROOT: &str = "PRICEDOCK_SHARED_ROOT";
pub const ENV_INTELLIGENCE_URL: &str = "PRICEDOCK_INTELLIGENCE_URL";

pub const DEFAULT_SHARED_ROOT: &str = "/var/lib/pricedock/staging";
pub const DEFAULT_INTELLIGENCE_URL: &str = "http://127.0.0.1:7410";

// =============================================================================
// Environment Variables - Acquisition & lifecycle
// =============================================================================

pub const ENV_MAX_FILE_SIZE_MB: &str = "PRICEDOCK_MAX_FILE_SIZE_MB";
pub const ENV_DOWNLOAD_TIMEOUT_S: &str = "PRICEDOCK_DOWNLOAD_TIMEOUT_S";
pub const ENV_POLL_INTERVAL_S: &str = "PRICEDOCK_POLL_INTERVAL_S";
pub const ENV_STALL_TIMEOUT_S: &str = "PRICEDOCK_STALL_TIMEOUT_S";
pub const ENV_CLEANUP_TTL_H: &str = "PRICEDOCK_CLEANUP_TTL_H";
pub const ENV_CLEANUP_INTERVAL_H: &str = "PRICEDOCK_CLEANUP_INTERVAL_H";
pub const ENV_MAX_RETRIES: &str = "PRICEDOCK_MAX_RETRIES";
pub const ENV_RETRY_BACKOFF_BASE_S: &str = "PRICEDOCK_RETRY_BACKOFF_BASE_S";
pub const ENV_QUEUE_DEPTH_LIMIT: &str = "PRICEDOCK_QUEUE_DEPTH_LIMIT";
pub const ENV_WORKER_COUNT: &str = "PRICEDOCK_WORKER_COUNT";

pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 50;
pub const DEFAULT_DOWNLOAD_TIMEOUT_S: u64 = 120;
pub const DEFAULT_POLL_INTERVAL_S: u64 = 5;
pub const DEFAULT_STALL_TIMEOUT_S: u64 = 1_800;
pub const DEFAULT_CLEANUP_TTL_H: u64 = 24;
pub const DEFAULT_CLEANUP_INTERVAL_H: u64 = 6;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_BASE_S: u64 = 30;
pub const DEFAULT_RETRY_BACKOFF_FACTOR: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF_CAP_S: u64 = 600;
pub const DEFAULT_QUEUE_DEPTH_LIMIT: u64 = 256;
pub const DEFAULT_WORKER_COUNT: usize = 2;
