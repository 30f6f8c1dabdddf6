//! Parsing-log repository.
//!
//! Logs are written with their own autocommit statements, never inside a
//! persist batch, so one bad row can never roll a batch back.

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use pricedock_core::ErrorKind;

use crate::data::postgres::PostgresError;

/// One structured row/chunk/stage error.
#[derive(Debug, Clone)]
pub struct ParsingLog {
    pub analysis_id: Uuid,
    pub job_id: Uuid,
    pub chunk_id: Option<u32>,
    pub row_in_chunk: Option<u32>,
    pub kind: ErrorKind,
    pub message: String,
    pub row_snapshot: Option<serde_json::Value>,
}

pub async fn insert_log(pool: &PgPool, log: &ParsingLog) -> Result<(), PostgresError> {
    let now = Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO parsing_logs
             (analysis_id, job_id, chunk_id, row_in_chunk, error_kind, message, row_snapshot, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(log.analysis_id)
    .bind(log.job_id)
    .bind(log.chunk_id.map(|c| c as i32))
    .bind(log.row_in_chunk.map(|r| r as i32))
    .bind(log.kind.as_str())
    .bind(&log.message)
    .bind(&log.row_snapshot)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Latest messages per error kind, bounded per kind, for the status API.
pub async fn recent_messages_by_kind(
    pool: &PgPool,
    analysis_id: Uuid,
    per_kind_limit: u32,
) -> Result<BTreeMap<ErrorKind, Vec<String>>, PostgresError> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT error_kind, message FROM (
             SELECT error_kind, message,
                    ROW_NUMBER() OVER (PARTITION BY error_kind ORDER BY id DESC) AS rank
             FROM parsing_logs WHERE analysis_id = $1
         ) ranked
         WHERE rank <= $2
         ORDER BY error_kind, rank",
    )
    .bind(analysis_id)
    .bind(per_kind_limit as i64)
    .fetch_all(pool)
    .await?;

    let mut grouped: BTreeMap<ErrorKind, Vec<String>> = BTreeMap::new();
    for (kind, message) in rows {
        match kind.parse::<ErrorKind>() {
            Ok(kind) => grouped.entry(kind).or_default().push(message),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping parsing log with unknown kind");
            }
        }
    }
    Ok(grouped)
}
