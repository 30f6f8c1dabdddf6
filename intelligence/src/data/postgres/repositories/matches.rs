//! Match-review queue repository.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::data::postgres::PostgresError;

/// Enqueue a mid-confidence match for human review.
pub async fn enqueue_match_review(
    pool: &PgPool,
    supplier_item_id: Uuid,
    candidate_product_id: Uuid,
    confidence: f64,
    reasoning: Option<&str>,
) -> Result<Uuid, PostgresError> {
    let id = Uuid::new_v4();
    let now = Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO match_review_queue
             (id, supplier_item_id, candidate_product_id, confidence, reasoning, status, created_at)
         VALUES ($1, $2, $3, $4, $5, 'pending', $6)",
    )
    .bind(id)
    .bind(supplier_item_id)
    .bind(candidate_product_id)
    .bind(confidence)
    .bind(reasoning)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}
