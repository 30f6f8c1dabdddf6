//! Status poller: mirrors analysis state into the job store, detects
//! stalls.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use pricedock_core::lifecycle::StopSignal;
use pricedock_core::protocol::AnalysisStatusResponse;
use pricedock_core::store::{JobStore, StoreError};
use pricedock_core::{ErrorKind, Job, JobPatch};

use crate::client::IntelligenceClient;

pub struct Poller {
    jobs: JobStore,
    client: IntelligenceClient,
    poll_interval: Duration,
    stall_timeout: Duration,
}

impl Poller {
    pub fn new(
        jobs: JobStore,
        client: IntelligenceClient,
        poll_interval: Duration,
        stall_timeout: Duration,
    ) -> Self {
        Self {
            jobs,
            client,
            poll_interval,
            stall_timeout,
        }
    }

    pub fn start(self, mut stop: StopSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::debug!(interval_s = self.poll_interval.as_secs(), "Poller started");

            loop {
                tokio::select! {
                    biased;
                    _ = stop.recv() => break,
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                }
            }
            tracing::debug!("Poller stopped");
        })
    }

    async fn tick(&self) {
        match self.jobs.list_polling().await {
            Ok(jobs) => {
                for job in jobs {
                    self.poll_one(&job).await;
                }
            }
            Err(e) => tracing::warn!(error = %e, "Cannot list jobs to poll"),
        }

        self.sweep_stalled().await;
    }

    async fn poll_one(&self, job: &Job) {
        let Some(analysis_id) = job.analysis_id else {
            return;
        };
        match self.client.status(analysis_id).await {
            Ok(status) => self.mirror(job, status).await,
            Err(e) => {
                // Transient poll failures are tolerated; a dead analysis
                // eventually trips the stall sweep.
                tracing::debug!(job_id = %job.id, error = %e, "Status poll failed");
            }
        }
    }

    /// Copy phase/progress/counters into the job, but only when
    /// something actually moved so `updated_at` keeps meaning "last
    /// observed change".
    async fn mirror(&self, job: &Job, status: AnalysisStatusResponse) {
        if status.phase == job.phase
            && status.progress == job.progress
            && status.counters == job.counters
        {
            return;
        }

        // Ignore stale reads: the store refuses regressions anyway, but
        // an equal-phase progress decrease is also just staleness.
        if status.phase.order() < job.phase.order() {
            tracing::debug!(job_id = %job.id, "Stale analysis status, skipping");
            return;
        }

        let patch = JobPatch {
            phase: (status.phase != job.phase).then_some(status.phase),
            progress: Some(status.progress),
            counters: Some(status.counters),
            error_kind: status.error_kind,
            ..JobPatch::default()
        };

        match self.jobs.update(job.id, job.phase, patch).await {
            Ok(updated) => {
                if updated.phase != job.phase {
                    tracing::info!(
                        job_id = %job.id,
                        phase = %updated.phase,
                        progress = updated.progress,
                        "Job phase mirrored"
                    );
                }
            }
            Err(StoreError::PhaseConflict { actual, .. }) => {
                tracing::debug!(job_id = %job.id, actual = %actual, "Concurrent phase change");
            }
            Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Cannot mirror job status"),
        }
    }

    /// Jobs whose analysis stopped moving get failed with `Stalled`.
    /// The staged file is left for the retention sweep.
    async fn sweep_stalled(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.stall_timeout).unwrap_or(chrono::Duration::zero());
        let stalled = match self.jobs.list_stalled(cutoff).await {
            Ok(stalled) => stalled,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot list stalled jobs");
                return;
            }
        };

        for job in stalled {
            tracing::warn!(
                job_id = %job.id,
                phase = %job.phase,
                updated_at = %job.updated_at,
                "Job stalled, failing"
            );
            match self
                .jobs
                .update(job.id, job.phase, JobPatch::failed(ErrorKind::Stalled))
                .await
            {
                Ok(_) => {}
                Err(StoreError::PhaseConflict { .. }) => {}
                Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Cannot fail stalled job"),
            }
        }
    }
}
