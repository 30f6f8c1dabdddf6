//! Analysis repository: intelligence-side sub-jobs.
//!
//! Each analysis has exactly one writer (the pipeline task that owns it),
//! so updates here are plain writes; cross-service consistency comes from
//! the courier mirroring this table into `jobs` via its own CAS store.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use pricedock_core::protocol::{AnalysisResult, FileKind};
use pricedock_core::{ErrorKind, JobCounters, JobPhase};

use crate::data::postgres::PostgresError;

#[derive(Debug, Clone)]
pub struct Analysis {
    pub id: Uuid,
    pub job_id: Uuid,
    pub supplier_id: Uuid,
    pub file_path: String,
    pub file_kind: FileKind,
    pub phase: JobPhase,
    pub progress: u8,
    pub counters: JobCounters,
    pub error_kind: Option<ErrorKind>,
    pub result: Option<AnalysisResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

type AnalysisRow = (
    Uuid,
    Uuid,
    Uuid,
    String,
    String,
    String,
    i32,
    serde_json::Value,
    Option<String>,
    Option<serde_json::Value>,
    i64,
    i64,
    Option<i64>,
);

const COLUMNS: &str = "id, job_id, supplier_id, file_path, file_kind, phase, progress, \
     counters, error_kind, result, created_at, updated_at, completed_at";

fn row_to_analysis(row: AnalysisRow) -> Result<Analysis, PostgresError> {
    let (
        id,
        job_id,
        supplier_id,
        file_path,
        file_kind,
        phase,
        progress,
        counters,
        error_kind,
        result,
        created_at,
        updated_at,
        completed_at,
    ) = row;

    let corrupt = |message: String| PostgresError::Corrupt {
        table: "analyses",
        message,
    };

    Ok(Analysis {
        id,
        job_id,
        supplier_id,
        file_path,
        file_kind: file_kind.parse().map_err(corrupt)?,
        phase: phase.parse().map_err(corrupt)?,
        progress: progress.clamp(0, 100) as u8,
        counters: serde_json::from_value(counters)?,
        error_kind: error_kind.map(|s| s.parse()).transpose().map_err(corrupt)?,
        result: result.map(serde_json::from_value).transpose()?,
        created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
        updated_at: DateTime::from_timestamp(updated_at, 0).unwrap_or_default(),
        completed_at: completed_at.and_then(|ts| DateTime::from_timestamp(ts, 0)),
    })
}

/// Create an analysis in phase `analyzing`.
pub async fn create_analysis(
    pool: &PgPool,
    job_id: Uuid,
    supplier_id: Uuid,
    file_path: &str,
    file_kind: FileKind,
) -> Result<Analysis, PostgresError> {
    let id = Uuid::new_v4();
    let now = Utc::now().timestamp();
    let counters = serde_json::to_value(JobCounters::default())?;

    let row: AnalysisRow = sqlx::query_as(&format!(
        "INSERT INTO analyses (id, job_id, supplier_id, file_path, file_kind, phase, progress, counters, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8, $8)
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(job_id)
    .bind(supplier_id)
    .bind(file_path)
    .bind(file_kind.as_str())
    .bind(JobPhase::Analyzing.as_str())
    .bind(counters)
    .bind(now)
    .fetch_one(pool)
    .await?;

    row_to_analysis(row)
}

pub async fn get_analysis(pool: &PgPool, id: Uuid) -> Result<Option<Analysis>, PostgresError> {
    let row: Option<AnalysisRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM analyses WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?;

    row.map(row_to_analysis).transpose()
}

/// Progress update from the owning pipeline task.
pub async fn update_progress(
    pool: &PgPool,
    id: Uuid,
    phase: JobPhase,
    progress: u8,
    counters: &JobCounters,
) -> Result<(), PostgresError> {
    let now = Utc::now().timestamp();
    sqlx::query(
        "UPDATE analyses SET phase = $2, progress = $3, counters = $4, updated_at = $5 WHERE id = $1",
    )
    .bind(id)
    .bind(phase.as_str())
    .bind(progress as i32)
    .bind(serde_json::to_value(counters)?)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Terminal update: phase, final counters, optional failure kind and result.
pub async fn finalize_analysis(
    pool: &PgPool,
    id: Uuid,
    phase: JobPhase,
    counters: &JobCounters,
    error_kind: Option<ErrorKind>,
    result: Option<&AnalysisResult>,
) -> Result<(), PostgresError> {
    debug_assert!(phase.is_terminal());
    let now = Utc::now().timestamp();
    sqlx::query(
        "UPDATE analyses SET phase = $2, progress = 100, counters = $3, error_kind = $4,
             result = $5, updated_at = $6, completed_at = $6
         WHERE id = $1",
    )
    .bind(id)
    .bind(phase.as_str())
    .bind(serde_json::to_value(counters)?)
    .bind(error_kind.map(|k| k.as_str()))
    .bind(result.map(serde_json::to_value).transpose()?)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_parses_with_result() {
        let result = serde_json::to_value(AnalysisResult {
            supplier_item_ids: vec![Uuid::new_v4()],
            review_ids: vec![],
        })
        .unwrap();
        let counters = serde_json::to_value(JobCounters::default()).unwrap();

        let analysis = row_to_analysis((
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "/srv/staging/supplier_a_b.xlsx".into(),
            "spreadsheet".into(),
            "complete".into(),
            100,
            counters,
            None,
            Some(result),
            1_700_000_000,
            1_700_000_300,
            Some(1_700_000_300),
        ))
        .unwrap();

        assert_eq!(analysis.phase, JobPhase::Complete);
        assert_eq!(analysis.result.unwrap().supplier_item_ids.len(), 1);
        assert!(analysis.completed_at.is_some());
    }
}
