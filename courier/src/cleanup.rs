//! Retention cleanup: delete staged files of long-terminated jobs.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use pricedock_core::lifecycle::StopSignal;
use pricedock_core::staging::remove_staged;
use pricedock_core::store::JobStore;

pub struct Cleaner {
    jobs: JobStore,
    retention: Duration,
    interval: Duration,
}

impl Cleaner {
    pub fn new(jobs: JobStore, retention: Duration, interval: Duration) -> Self {
        Self {
            jobs,
            retention,
            interval,
        }
    }

    pub fn start(self, mut stop: StopSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::debug!(
                retention_h = self.retention.as_secs() / 3600,
                interval_h = self.interval.as_secs() / 3600,
                "Cleaner started"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = stop.recv() => break,
                    _ = interval.tick() => {
                        self.sweep(Utc::now()).await;
                    }
                }
            }
            tracing::debug!("Cleaner stopped");
        })
    }

    /// Delete payload + sidecar for every job that terminated more than
    /// `retention` before `now`. Non-terminal jobs are never touched (the
    /// store query only yields terminal ones).
    pub async fn sweep(&self, now: DateTime<Utc>) {
        let cutoff =
            now - chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::zero());
        let jobs = match self.jobs.list_terminal_before(cutoff).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot list cleanup candidates");
                return;
            }
        };

        let mut removed = 0usize;
        for job in jobs {
            let Some(file_path) = &job.file_path else {
                continue;
            };
            match remove_staged(Path::new(file_path)).await {
                Ok(()) => {
                    removed += 1;
                    if let Err(e) = self.jobs.clear_file_path(job.id).await {
                        tracing::warn!(job_id = %job.id, error = %e, "Cannot detach cleaned file");
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        path = %file_path,
                        error = %e,
                        "Cannot remove staged file"
                    );
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Staged files cleaned up");
        }
    }
}
