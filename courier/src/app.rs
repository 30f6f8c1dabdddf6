//! Core application

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use pricedock_core::lifecycle::Lifecycle;
use pricedock_core::store::JobStore;

use crate::cleanup::Cleaner;
use crate::client::IntelligenceClient;
use crate::core::cli::{self, Commands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::download::DownloadDeps;
use crate::poller::Poller;
use crate::service::CourierService;
use crate::source::SourceDescriptor;
use crate::worker::DownloadWorker;

pub struct App;

impl App {
    /// Run the courier with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Courier starting");

        let (cli_config, command) = cli::parse();
        let config = AppConfig::load(&cli_config)?;

        match command {
            Some(Commands::Enqueue { supplier, source }) => {
                let pool = Self::connect(&config).await?;
                let service =
                    CourierService::new(pool, config.queue_depth_limit, config.retry);
                let descriptor: SourceDescriptor =
                    source.parse().context("invalid source descriptor")?;
                let job_id = service.enqueue(supplier, &descriptor).await?;
                println!("{}", job_id);
                Ok(())
            }
            Some(Commands::Retry { job }) => {
                let pool = Self::connect(&config).await?;
                let service =
                    CourierService::new(pool, config.queue_depth_limit, config.retry);
                service.retry(job).await?;
                println!("retry queued for {}", job);
                Ok(())
            }
            Some(Commands::Start) | None => Self::start(config).await,
        }
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

    async fn connect(config: &AppConfig) -> Result<PgPool> {
        PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
            .context("cannot connect to PostgreSQL")
    }

    async fn start(config: AppConfig) -> Result<()> {
        let lifecycle = Lifecycle::new();
        lifecycle.watch_os_signals();

        let pool = Self::connect(&config).await?;
        tokio::fs::create_dir_all(&config.shared_root)
            .await
            .with_context(|| {
                format!("cannot create shared root {}", config.shared_root.display())
            })?;

        let jobs = JobStore::new(pool.clone());
        let intelligence =
            IntelligenceClient::new(&config.intelligence_url, Duration::from_secs(30))
                .context("cannot build intelligence client")?;

        let http = reqwest::Client::builder()
            .timeout(config.download_timeout)
            .build()
            .context("cannot build download client")?;

        let deps = Arc::new(DownloadDeps {
            http,
            jobs: jobs.clone(),
            intelligence: intelligence.clone(),
            shared_root: config.shared_root.clone(),
            max_file_size_bytes: config.max_file_size_bytes,
        });

        for worker_id in 0..config.worker_count {
            let worker =
                DownloadWorker::new(Arc::clone(&deps), pool.clone(), config.retry);
            lifecycle
                .track(
                    format!("download-worker-{}", worker_id),
                    worker.start(worker_id, lifecycle.stop_signal()),
                )
                .await;
        }

        let poller = Poller::new(
            jobs.clone(),
            intelligence,
            config.poll_interval,
            config.stall_timeout,
        );
        lifecycle
            .track("status-poller", poller.start(lifecycle.stop_signal()))
            .await;

        let cleaner = Cleaner::new(jobs, config.cleanup_retention, config.cleanup_interval);
        lifecycle
            .track("retention-cleaner", cleaner.start(lifecycle.stop_signal()))
            .await;

        tracing::info!(
            workers = config.worker_count,
            poll_interval_s = config.poll_interval.as_secs(),
            shared_root = %config.shared_root.display(),
            intelligence = %config.intelligence_url,
            "Courier running"
        );

        lifecycle.stop_signal().stopped().await;
        lifecycle.drain().await;
        Ok(())
    }
}
