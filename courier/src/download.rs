//! The download worker operation: fetch bytes, stage them, trigger
//! analysis.

use std::path::PathBuf;

use chrono::Utc;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use pricedock_core::protocol::AnalyzeFileRequest;
use pricedock_core::staging::{StagedFileMeta, stage_bytes, staged_file_name};
use pricedock_core::store::{JobStore, StoreError};
use pricedock_core::{ErrorKind, JobPatch, JobPhase};

use crate::client::IntelligenceClient;
use crate::error::CourierError;
use crate::queue::QueueItem;
use crate::source::SourceDescriptor;

/// Everything the download path needs.
pub struct DownloadDeps {
    pub http: reqwest::Client,
    pub jobs: JobStore,
    pub intelligence: IntelligenceClient,
    pub shared_root: PathBuf,
    pub max_file_size_bytes: u64,
}

/// Stream a URL into memory, enforcing the size cap mid-stream and
/// hashing as bytes arrive.
async fn fetch_bytes(
    deps: &DownloadDeps,
    url: &str,
) -> Result<(Vec<u8>, String), CourierError> {
    let response = deps.http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CourierError::SourceUnavailable {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    if let Some(declared) = response.content_length() {
        if declared > deps.max_file_size_bytes {
            return Err(CourierError::FileTooLarge {
                size: declared,
                cap: deps.max_file_size_bytes,
            });
        }
    }

    let mut bytes: Vec<u8> = Vec::new();
    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if (bytes.len() + chunk.len()) as u64 > deps.max_file_size_bytes {
            return Err(CourierError::FileTooLarge {
                size: (bytes.len() + chunk.len()) as u64,
                cap: deps.max_file_size_bytes,
            });
        }
        hasher.update(&chunk);
        bytes.extend_from_slice(&chunk);
    }

    Ok((bytes, hex::encode(hasher.finalize())))
}

/// Mark the job failed with `kind`, tolerating CAS conflicts (someone
/// else terminated it first).
pub async fn mark_failed(jobs: &JobStore, job_id: Uuid, phase: JobPhase, kind: ErrorKind) {
    match jobs.update(job_id, phase, JobPatch::failed(kind)).await {
        Ok(_) => {}
        Err(StoreError::PhaseConflict { actual, .. }) => {
            tracing::debug!(job_id = %job_id, actual = %actual, "Job moved on before failure mark");
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Cannot mark job failed");
        }
    }
}

/// Process one claimed queue item: download, stage, request analysis.
///
/// Returns `Ok` when the item is finished with (successfully or after a
/// terminal failure mark); `Err` only for retryable trouble the worker
/// should reschedule.
pub async fn download_and_trigger(
    deps: &DownloadDeps,
    item: &QueueItem,
) -> Result<(), CourierError> {
    let Some(job) = deps.jobs.get(item.job_id).await? else {
        tracing::warn!(job_id = %item.job_id, "Queue item for unknown job, dropping");
        return Ok(());
    };
    if job.phase != JobPhase::Downloading {
        tracing::debug!(job_id = %job.id, phase = %job.phase, "Job already past download");
        return Ok(());
    }

    let descriptor: SourceDescriptor = match item.source.parse() {
        Ok(descriptor) => descriptor,
        Err(e) => {
            tracing::warn!(job_id = %job.id, error = %e, "Invalid source descriptor");
            mark_failed(&deps.jobs, job.id, JobPhase::Downloading, ErrorKind::InvalidSource).await;
            return Ok(());
        }
    };

    // --- Fetch -----------------------------------------------------------
    let url = descriptor.download_url();
    let (bytes, sha256) = match fetch_bytes(deps, &url).await {
        Ok(fetched) => fetched,
        Err(CourierError::FileTooLarge { size, cap }) => {
            tracing::warn!(job_id = %job.id, size, cap, "Source exceeds the size cap");
            mark_failed(&deps.jobs, job.id, JobPhase::Downloading, ErrorKind::FileTooLarge).await;
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    // --- Stage -----------------------------------------------------------
    let file_kind = descriptor.kind.file_kind();
    let file_name = staged_file_name(job.supplier_id, job.id, file_kind);
    let payload_path = deps.shared_root.join(&file_name);

    stage_bytes(&payload_path, &bytes).await?;
    StagedFileMeta {
        job_id: job.id,
        supplier_id: job.supplier_id,
        size: bytes.len() as u64,
        sha256,
        kind: file_kind,
        acquired_at: Utc::now(),
    }
    .write_beside(&payload_path)
    .await?;

    tracing::info!(
        job_id = %job.id,
        path = %payload_path.display(),
        size = bytes.len(),
        "File staged"
    );

    // --- Hand off --------------------------------------------------------
    let file_path = payload_path.to_string_lossy().to_string();
    deps.jobs
        .update(
            job.id,
            JobPhase::Downloading,
            JobPatch {
                phase: Some(JobPhase::Analyzing),
                file_path: Some(file_path.clone()),
                file_kind: Some(file_kind),
                ..JobPatch::default()
            },
        )
        .await?;

    let request = AnalyzeFileRequest {
        job_id: job.id,
        supplier_id: job.supplier_id,
        file_path,
        file_kind,
    };
    match deps.intelligence.analyze_file(&request).await {
        Ok(analysis_id) => {
            deps.jobs
                .update(
                    job.id,
                    JobPhase::Analyzing,
                    JobPatch {
                        analysis_id: Some(analysis_id),
                        ..JobPatch::default()
                    },
                )
                .await?;
            tracing::info!(job_id = %job.id, analysis_id = %analysis_id, "Analysis requested");
            Ok(())
        }
        Err(e) => {
            tracing::warn!(job_id = %job.id, error = %e, "Analysis request failed");
            mark_failed(
                &deps.jobs,
                job.id,
                JobPhase::Analyzing,
                ErrorKind::AnalysisUnreachable,
            )
            .await;
            Ok(())
        }
    }
}
