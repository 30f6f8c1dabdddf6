//! API server assembly.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;

use pricedock_core::supplier::SupplierStore;

use super::routes::{analyze, health};
use crate::domain::etl::pipeline::AnalysisPipeline;
use crate::llm::client::HttpLlmClient;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    pub pool: PgPool,
    pub suppliers: SupplierStore,
    pub llm: Arc<HttpLlmClient>,
    pub pipeline: Arc<AnalysisPipeline>,
    /// Admission control for concurrent analyses.
    pub analysis_slots: Arc<Semaphore>,
    pub status_log_limit: u32,
    pub max_file_size_bytes: u64,
}

pub struct ApiServer {
    state: ApiState,
    host: String,
    port: u16,
}

impl ApiServer {
    pub fn new(state: ApiState, host: &str, port: u16) -> Self {
        Self {
            state,
            host: host.to_string(),
            port,
        }
    }

    pub fn router(state: ApiState) -> Router {
        Router::new()
            .route("/analyze/file", post(analyze::analyze_file))
            .route("/analyze/status/{analysis_id}", get(analyze::analysis_status))
            .route("/analyze/vision", post(analyze::analyze_vision))
            .route("/health", get(health::health))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve until the shutdown future resolves.
    pub async fn start(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let address = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .with_context(|| format!("cannot bind {}", address))?;
        tracing::info!(address = %address, "Intelligence API listening");

        axum::serve(listener, Self::router(self.state))
            .with_graceful_shutdown(shutdown)
            .await
            .context("API server error")?;
        Ok(())
    }
}
