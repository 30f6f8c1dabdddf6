//! Cross-service job state store.
//!
//! A Postgres-backed key/value view of the `jobs` table. Every mutation is
//! a compare-and-set on the phase column: the caller states the phase it
//! believes the job is in, and the update only lands if that is still
//! true. Combined with the single-writer-per-phase rule this makes lost
//! updates impossible without any locking.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::error_kind::ErrorKind;
use crate::job::{Job, JobCounters, JobPatch, JobPhase};
use crate::protocol::FileKind;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {job_id}: expected phase {expected}, found {actual}")]
    PhaseConflict {
        job_id: Uuid,
        expected: JobPhase,
        actual: JobPhase,
    },

    #[error("Job {job_id}: refusing phase regression {from} -> {to}")]
    Monotonicity {
        job_id: Uuid,
        from: JobPhase,
        to: JobPhase,
    },

    #[error("Job {job_id}: corrupt column {column}: {message}")]
    Corrupt {
        job_id: Uuid,
        column: &'static str,
        message: String,
    },
}

/// Fields required to create a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Uuid,
    pub supplier_id: Uuid,
    pub source: String,
}

type JobRow = (
    Uuid,                   // id
    Uuid,                   // supplier_id
    String,                 // phase
    i32,                    // progress
    serde_json::Value,      // counters
    Option<String>,         // error_kind
    String,                 // source
    Option<String>,         // file_path
    Option<String>,         // file_kind
    Option<Uuid>,           // analysis_id
    i32,                    // retry_count
    i64,                    // created_at
    i64,                    // updated_at
    Option<i64>,            // completed_at
);

const JOB_COLUMNS: &str = "id, supplier_id, phase, progress, counters, error_kind, source, \
     file_path, file_kind, analysis_id, retry_count, created_at, updated_at, completed_at";

fn row_to_job(row: JobRow) -> Result<Job, StoreError> {
    let (
        id,
        supplier_id,
        phase,
        progress,
        counters,
        error_kind,
        source,
        file_path,
        file_kind,
        analysis_id,
        retry_count,
        created_at,
        updated_at,
        completed_at,
    ) = row;

    let phase: JobPhase = phase.parse().map_err(|message| StoreError::Corrupt {
        job_id: id,
        column: "phase",
        message,
    })?;
    let error_kind = error_kind
        .map(|s| s.parse::<ErrorKind>())
        .transpose()
        .map_err(|message| StoreError::Corrupt {
            job_id: id,
            column: "error_kind",
            message,
        })?;
    let file_kind = file_kind
        .map(|s| s.parse::<FileKind>())
        .transpose()
        .map_err(|message| StoreError::Corrupt {
            job_id: id,
            column: "file_kind",
            message,
        })?;
    let counters: JobCounters = serde_json::from_value(counters)?;

    Ok(Job {
        id,
        supplier_id,
        phase,
        progress: progress.clamp(0, 100) as u8,
        counters,
        error_kind,
        source,
        file_path,
        file_kind,
        analysis_id,
        retry_count: retry_count.max(0) as u32,
        created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
        updated_at: DateTime::from_timestamp(updated_at, 0).unwrap_or_default(),
        completed_at: completed_at.and_then(|ts| DateTime::from_timestamp(ts, 0)),
    })
}

/// Handle over the `jobs` table.
#[derive(Clone)]
pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a job in phase `downloading`.
    pub async fn create(&self, new: NewJob) -> Result<Job, StoreError> {
        let now = Utc::now().timestamp();
        let counters = serde_json::to_value(JobCounters::default())?;

        let row: JobRow = sqlx::query_as(&format!(
            "INSERT INTO jobs (id, supplier_id, phase, progress, counters, source, retry_count, created_at, updated_at)
             VALUES ($1, $2, $3, 0, $4, $5, 0, $6, $6)
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(new.id)
        .bind(new.supplier_id)
        .bind(JobPhase::Downloading.as_str())
        .bind(counters)
        .bind(&new.source)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row_to_job(row)
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(row_to_job).transpose()
    }

    /// Compare-and-set merge patch.
    ///
    /// The update lands only if the job is still in `expected` phase.
    /// Phase regressions are refused before touching the database; retry
    /// resets go through [`JobStore::record_retry`] instead.
    pub async fn update(
        &self,
        job_id: Uuid,
        expected: JobPhase,
        patch: JobPatch,
    ) -> Result<Job, StoreError> {
        if let Some(next) = patch.phase {
            if expected.is_terminal() || next.order() < expected.order() {
                return Err(StoreError::Monotonicity {
                    job_id,
                    from: expected,
                    to: next,
                });
            }
        }

        let now = Utc::now().timestamp();
        let counters = patch
            .counters
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let completing = patch.phase.is_some_and(|p| p.is_terminal());

        let row: Option<JobRow> = sqlx::query_as(&format!(
            "UPDATE jobs SET
                 phase = COALESCE($3, phase),
                 progress = COALESCE($4, progress),
                 counters = COALESCE($5, counters),
                 error_kind = COALESCE($6, error_kind),
                 file_path = COALESCE($7, file_path),
                 file_kind = COALESCE($8, file_kind),
                 analysis_id = COALESCE($9, analysis_id),
                 updated_at = $10,
                 completed_at = CASE WHEN $11 THEN $10 ELSE completed_at END
             WHERE id = $1 AND phase = $2
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(expected.as_str())
        .bind(patch.phase.map(|p| p.as_str()))
        .bind(patch.progress.map(|p| p as i32))
        .bind(counters)
        .bind(patch.error_kind.map(|k| k.as_str()))
        .bind(patch.file_path)
        .bind(patch.file_kind.map(|k| k.as_str()))
        .bind(patch.analysis_id)
        .bind(now)
        .bind(completing)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_job(row),
            None => match self.get(job_id).await? {
                Some(job) => Err(StoreError::PhaseConflict {
                    job_id,
                    expected,
                    actual: job.phase,
                }),
                None => Err(StoreError::NotFound(job_id)),
            },
        }
    }

    /// Jobs that terminated before `cutoff` (cleanup candidates).
    pub async fn list_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE phase IN ('complete', 'completed_with_errors', 'failed')
               AND completed_at IS NOT NULL AND completed_at < $1
               AND file_path IS NOT NULL
             ORDER BY completed_at"
        ))
        .bind(cutoff.timestamp())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_job).collect()
    }

    /// Non-terminal jobs past the download phase whose state has not moved
    /// since `cutoff` (stall candidates for the poller).
    pub async fn list_stalled(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE phase IN ('analyzing', 'extracting', 'normalizing', 'matching')
               AND updated_at < $1
             ORDER BY updated_at"
        ))
        .bind(cutoff.timestamp())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_job).collect()
    }

    /// Jobs currently being polled: analysis accepted, not yet terminal.
    pub async fn list_polling(&self) -> Result<Vec<Job>, StoreError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE phase IN ('analyzing', 'extracting', 'normalizing', 'matching')
               AND analysis_id IS NOT NULL
             ORDER BY updated_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_job).collect()
    }

    /// Detach the staged file from a terminal job after cleanup deleted
    /// it, so later sweeps skip the row.
    pub async fn clear_file_path(&self, job_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE jobs SET file_path = NULL WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reset a failed job for another download attempt.
    ///
    /// This is the one sanctioned phase "regression": `failed` back to
    /// `downloading`, guarded by the retry budget. Returns `None` when the
    /// job is not failed or the budget is spent.
    pub async fn record_retry(
        &self,
        job_id: Uuid,
        max_retries: u32,
    ) -> Result<Option<Job>, StoreError> {
        let now = Utc::now().timestamp();

        let row: Option<JobRow> = sqlx::query_as(&format!(
            "UPDATE jobs SET
                 phase = 'downloading',
                 progress = 0,
                 error_kind = NULL,
                 analysis_id = NULL,
                 completed_at = NULL,
                 retry_count = retry_count + 1,
                 updated_at = $3
             WHERE id = $1 AND phase = 'failed' AND retry_count < $2
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(max_retries as i32)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_job).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_to_job_parses_all_columns() {
        let id = Uuid::new_v4();
        let supplier = Uuid::new_v4();
        let counters = serde_json::to_value(JobCounters::default()).unwrap();
        let job = row_to_job((
            id,
            supplier,
            "extracting".into(),
            42,
            counters,
            Some("extraction_timeout".into()),
            "pdf:https://example.com/list.pdf".into(),
            Some("/srv/staging/supplier_x.pdf".into()),
            Some("pdf".into()),
            None,
            1,
            1_700_000_000,
            1_700_000_060,
            None,
        ))
        .unwrap();

        assert_eq!(job.id, id);
        assert_eq!(job.phase, JobPhase::Extracting);
        assert_eq!(job.progress, 42);
        assert_eq!(job.error_kind, Some(ErrorKind::ExtractionTimeout));
        assert_eq!(job.file_kind, Some(FileKind::Pdf));
        assert_eq!(job.retry_count, 1);
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_row_to_job_rejects_corrupt_phase() {
        let counters = serde_json::to_value(JobCounters::default()).unwrap();
        let err = row_to_job((
            Uuid::new_v4(),
            Uuid::new_v4(),
            "warp_drive".into(),
            0,
            counters,
            None,
            "csv:https://example.com/a.csv".into(),
            None,
            None,
            None,
            0,
            0,
            0,
            None,
        ))
        .unwrap_err();

        assert!(matches!(err, StoreError::Corrupt { column: "phase", .. }));
    }
}
