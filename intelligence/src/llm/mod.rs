//! LLM runtime boundary.
//!
//! The pipeline only ever sees the [`ChatModel`] and [`EmbeddingModel`]
//! traits; the HTTP client in [`client`] is the production implementation
//! and tests substitute deterministic fakes.

pub mod client;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Runtime returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed runtime response: {0}")]
    Malformed(String),
}

impl LlmError {
    /// Server-side failures worth retrying; 4xx means the request itself
    /// is wrong and a retry cannot help.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Malformed(_) => false,
        }
    }
}

/// One chat-completion call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub seed: Option<u64>,
}

/// Chat-completion endpoint.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one completion and return the assistant message content.
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;
}

/// Text-embedding endpoint.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embed one text into a fixed-dimensional vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    /// Identifier recorded next to stored vectors.
    fn model_id(&self) -> &str;
}
