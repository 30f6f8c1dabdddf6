//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;

use pricedock_core::lifecycle::Lifecycle;
use pricedock_core::supplier::SupplierStore;

use crate::api::{ApiServer, ApiState};
use crate::core::cli::{self, Commands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::data::postgres;
use crate::domain::categories::CategoryCache;
use crate::domain::etl::pipeline::AnalysisPipeline;
use crate::llm::client::HttpLlmClient;
use crate::llm::{ChatModel, EmbeddingModel};

pub struct App;

impl App {
    /// Run the service with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Intelligence starting");

        let (cli_config, command) = cli::parse();
        match command {
            Some(Commands::Start) | None => {}
        }

        let config = AppConfig::load(&cli_config)?;
        Self::start(config).await
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_level(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start(config: AppConfig) -> Result<()> {
        let lifecycle = Lifecycle::new();
        lifecycle.watch_os_signals();

        let pool = postgres::connect(&config.database.url)
            .await
            .context("cannot connect to PostgreSQL")?;
        tracing::debug!("Database connected and migrated");

        let llm = Arc::new(
            HttpLlmClient::new(
                &config.llm.base_url,
                config.llm.api_key.clone(),
                &config.llm.model,
                &config.llm.embedding_model,
                config.llm.embedding_dim,
                config.llm.timeout,
            )
            .context("cannot build LLM client")?,
        );

        let categories = Arc::new(CategoryCache::new(
            pool.clone(),
            config.etl.category_cache_ttl,
        ));

        let pipeline = Arc::new(AnalysisPipeline::new(
            pool.clone(),
            Arc::clone(&llm) as Arc<dyn ChatModel>,
            Arc::clone(&llm) as Arc<dyn EmbeddingModel>,
            Arc::clone(&categories),
            config.pipeline_config(),
        ));

        let state = ApiState {
            pool: pool.clone(),
            suppliers: SupplierStore::new(pool.clone()),
            llm,
            pipeline,
            analysis_slots: Arc::new(Semaphore::new(config.etl.max_concurrent_analyses)),
            status_log_limit: config.etl.status_log_limit,
            max_file_size_bytes: config.etl.max_file_size_bytes,
        };

        tracing::info!(
            chunk_size = config.etl.chunk_size_rows,
            chunk_overlap = config.etl.chunk_overlap_rows,
            concurrency = config.etl.extractor_concurrency,
            matching = config.matching.enabled,
            shared_root = %config.shared_root.display(),
            "Pipeline configured"
        );

        let server = ApiServer::new(state, &config.server.host, config.server.port);
        server.start(lifecycle.stop_signal().stopped()).await?;
        lifecycle.drain().await;

        Ok(())
    }
}
