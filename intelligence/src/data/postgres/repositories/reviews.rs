//! Category-review repository: pending taxonomy decisions.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::data::postgres::PostgresError;

/// Create a pending review for an unresolved category path.
///
/// Returns the review id so the pipeline can report it in the analysis
/// result.
pub async fn create_review(
    pool: &PgPool,
    job_id: Uuid,
    analysis_id: Uuid,
    proposed_path: &[String],
    best_match_category_id: Option<Uuid>,
    best_match_score: u8,
) -> Result<Uuid, PostgresError> {
    let id = Uuid::new_v4();
    let now = Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO category_reviews
             (id, job_id, analysis_id, proposed_path, best_match_category_id, best_match_score,
              status, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $7)",
    )
    .bind(id)
    .bind(job_id)
    .bind(analysis_id)
    .bind(serde_json::to_value(proposed_path)?)
    .bind(best_match_category_id)
    .bind(best_match_score as i32)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

/// Review ids created by one analysis, in creation order.
pub async fn list_review_ids(
    pool: &PgPool,
    analysis_id: Uuid,
) -> Result<Vec<Uuid>, PostgresError> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM category_reviews WHERE analysis_id = $1 ORDER BY created_at, id",
    )
    .bind(analysis_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}
