//! Courier error types

use thiserror::Error;
use uuid::Uuid;

use pricedock_core::staging::StagingError;
use pricedock_core::store::StoreError;

#[derive(Error, Debug)]
pub enum CourierError {
    #[error("Invalid source descriptor: {0}")]
    InvalidSource(String),

    #[error("Supplier {0} not found")]
    UnknownSupplier(Uuid),

    #[error("Supplier {0} has semantic ETL disabled")]
    SupplierDisabled(Uuid),

    #[error("Queue depth {depth} at limit {limit}")]
    Backpressured { depth: u64, limit: u64 },

    #[error("File is {size} bytes, cap is {cap}")]
    FileTooLarge { size: u64, cap: u64 },

    #[error("Job {0} cannot be retried")]
    RetryNotAllowed(Uuid),

    #[error("Job state error: {0}")]
    Store(#[from] StoreError),

    #[error("Staging error: {0}")]
    Staging(#[from] StagingError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Source fetch returned status {status}: {url}")]
    SourceUnavailable { status: u16, url: String },

    #[error("Intelligence returned status {status}: {body}")]
    Intelligence { status: u16, body: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CourierError {
    /// Network and I/O failures are retryable (up to the retry budget);
    /// validation and policy failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Database(_) | Self::Staging(_) => true,
            Self::SourceUnavailable { status, .. } | Self::Intelligence { status, .. } => {
                *status >= 500 || *status == 429
            }
            _ => false,
        }
    }
}
