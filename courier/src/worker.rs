//! Queue consumer: drains due downloads, applies the retry policy.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use pricedock_core::lifecycle::StopSignal;
use pricedock_core::retry::RetryPolicy;
use pricedock_core::{ErrorKind, JobPhase};

use crate::download::{DownloadDeps, download_and_trigger, mark_failed};
use crate::error::CourierError;
use crate::queue::{self, QueueItem};

/// How long a claim stays invisible to other workers.
const CLAIM_LEASE: Duration = Duration::from_secs(300);

/// Idle poll cadence when the queue is empty.
const IDLE_POLL: Duration = Duration::from_secs(1);

pub struct DownloadWorker {
    deps: Arc<DownloadDeps>,
    pool: sqlx::PgPool,
    retry: RetryPolicy,
}

impl DownloadWorker {
    pub fn new(deps: Arc<DownloadDeps>, pool: sqlx::PgPool, retry: RetryPolicy) -> Self {
        Self { deps, pool, retry }
    }

    /// Spawn the consumer loop; it drains the queue, then sleeps until
    /// the next poll or a stop request.
    pub fn start(self, worker_id: usize, mut stop: StopSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::debug!(worker_id, "Download worker started");
            loop {
                tokio::select! {
                    biased;
                    _ = stop.recv() => break,
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                }
                self.drain_queue(&stop).await;
            }
            tracing::debug!(worker_id, "Download worker stopped");
        })
    }

    async fn drain_queue(&self, stop: &StopSignal) {
        loop {
            if stop.is_stopped() {
                return;
            }
            match queue::claim(&self.pool, CLAIM_LEASE).await {
                Ok(Some(item)) => self.process(item).await,
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "Queue claim failed");
                    return;
                }
            }
        }
    }

    async fn process(&self, item: QueueItem) {
        let job_id = item.job_id;
        match download_and_trigger(&self.deps, &item).await {
            Ok(()) => {
                if let Err(e) = queue::complete(&self.pool, item.queue_id).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Cannot remove finished queue item");
                }
            }
            Err(e) if e.is_retryable() && item.attempt < self.retry.max_attempts => {
                let delay = self.retry.delay_for(item.attempt - 1);
                tracing::warn!(
                    job_id = %job_id,
                    attempt = item.attempt,
                    delay_s = delay.as_secs(),
                    error = %e,
                    "Download failed, rescheduling"
                );
                if let Err(e) = queue::reschedule(&self.pool, item.queue_id, delay).await {
                    tracing::error!(job_id = %job_id, error = %e, "Cannot reschedule queue item");
                }
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job_id,
                    attempt = item.attempt,
                    error = %e,
                    "Download failed permanently"
                );
                let kind = terminal_kind(&e);
                mark_failed(&self.deps.jobs, job_id, JobPhase::Downloading, kind).await;
                if let Err(e) = queue::complete(&self.pool, item.queue_id).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Cannot remove dead queue item");
                }
            }
        }
    }
}

fn terminal_kind(error: &CourierError) -> ErrorKind {
    match error {
        CourierError::InvalidSource(_) => ErrorKind::InvalidSource,
        CourierError::FileTooLarge { .. } => ErrorKind::FileTooLarge,
        CourierError::Intelligence { .. } => ErrorKind::AnalysisUnreachable,
        CourierError::SourceUnavailable { .. } => ErrorKind::Unreadable,
        _ => ErrorKind::Unreadable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_kind_mapping() {
        assert_eq!(
            terminal_kind(&CourierError::InvalidSource("x".into())),
            ErrorKind::InvalidSource
        );
        assert_eq!(
            terminal_kind(&CourierError::FileTooLarge { size: 2, cap: 1 }),
            ErrorKind::FileTooLarge
        );
        assert_eq!(
            terminal_kind(&CourierError::Intelligence {
                status: 503,
                body: String::new()
            }),
            ErrorKind::AnalysisUnreachable
        );
        assert_eq!(
            terminal_kind(&CourierError::Staging(
                pricedock_core::staging::StagingError::Io(std::io::Error::other("disk"))
            )),
            ErrorKind::Unreadable
        );
    }
}
