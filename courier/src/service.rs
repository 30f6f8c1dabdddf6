//! On-demand courier operations: enqueue and retry.

use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use pricedock_core::retry::RetryPolicy;
use pricedock_core::store::{JobStore, NewJob};
use pricedock_core::supplier::SupplierStore;

use crate::error::CourierError;
use crate::queue;
use crate::source::SourceDescriptor;

pub struct CourierService {
    pool: PgPool,
    jobs: JobStore,
    suppliers: SupplierStore,
    queue_depth_limit: u64,
    retry: RetryPolicy,
}

impl CourierService {
    pub fn new(pool: PgPool, queue_depth_limit: u64, retry: RetryPolicy) -> Self {
        let jobs = JobStore::new(pool.clone());
        let suppliers = SupplierStore::new(pool.clone());
        Self {
            pool,
            jobs,
            suppliers,
            queue_depth_limit,
            retry,
        }
    }

    /// Create a job in phase `downloading` and queue its download.
    ///
    /// Fails with `SupplierDisabled` when the supplier's semantic-ETL
    /// flag is off (the caller must route the file elsewhere), and with
    /// `Backpressured` when the queue is at its depth limit.
    pub async fn enqueue(
        &self,
        supplier_id: Uuid,
        descriptor: &SourceDescriptor,
    ) -> Result<Uuid, CourierError> {
        let supplier = self
            .suppliers
            .get(supplier_id)
            .await?
            .ok_or(CourierError::UnknownSupplier(supplier_id))?;
        if !supplier.semantic_etl_enabled {
            return Err(CourierError::SupplierDisabled(supplier_id));
        }

        let depth = queue::depth(&self.pool).await?;
        if depth >= self.queue_depth_limit {
            return Err(CourierError::Backpressured {
                depth,
                limit: self.queue_depth_limit,
            });
        }

        let job = self
            .jobs
            .create(NewJob {
                id: Uuid::new_v4(),
                supplier_id,
                source: descriptor.to_string(),
            })
            .await?;
        queue::push(
            &self.pool,
            job.id,
            supplier_id,
            &descriptor.to_string(),
            Duration::ZERO,
        )
        .await?;

        tracing::info!(job_id = %job.id, supplier_id = %supplier_id, source = %descriptor, "Job enqueued");
        Ok(job.id)
    }

    /// Re-enqueue a failed job, if its retry budget allows.
    ///
    /// The n-th retry waits `base * 2^n` before becoming claimable.
    pub async fn retry(&self, job_id: Uuid) -> Result<(), CourierError> {
        let job = self
            .jobs
            .record_retry(job_id, self.retry.max_attempts)
            .await?
            .ok_or(CourierError::RetryNotAllowed(job_id))?;

        let delay = self.retry.delay_for(job.retry_count.saturating_sub(1));
        queue::push(&self.pool, job.id, job.supplier_id, &job.source, delay).await?;

        tracing::info!(
            job_id = %job.id,
            retry = job.retry_count,
            delay_s = delay.as_secs(),
            "Job re-enqueued"
        );
        Ok(())
    }
}
