//! Postgres-backed download queue.
//!
//! Items are claimed with `FOR UPDATE SKIP LOCKED` plus a lease: the
//! claim pushes `available_at` into the future, success deletes the row,
//! failure reschedules it with backoff. A crashed worker's lease simply
//! expires and the item becomes claimable again.
//!
//! Two jobs for the same (supplier, source) are serialized: an item is
//! only claimable while no sibling is currently leased, and a
//! transaction-scoped advisory lock closes the race between concurrent
//! claimers.

use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::CourierError;

/// One claimed work item.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub queue_id: i64,
    pub job_id: Uuid,
    pub supplier_id: Uuid,
    pub source: String,
    /// Claim attempts so far, including this one.
    pub attempt: u32,
}

/// Stable 64-bit advisory-lock key for a (supplier, source) pair.
fn serialization_key(supplier_id: Uuid, source: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(supplier_id.as_bytes());
    hasher.update(b"|");
    hasher.update(source.as_bytes());
    let digest = hasher.finalize();
    i64::from_be_bytes(digest[..8].try_into().unwrap_or_default())
}

/// Pending item count, for backpressure at enqueue.
pub async fn depth(pool: &PgPool) -> Result<u64, CourierError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM job_queue")
        .fetch_one(pool)
        .await?;
    Ok(count.max(0) as u64)
}

/// Schedule a job for download at `delay` from now.
pub async fn push(
    pool: &PgPool,
    job_id: Uuid,
    supplier_id: Uuid,
    source: &str,
    delay: Duration,
) -> Result<(), CourierError> {
    let now = Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO job_queue (job_id, supplier_id, source, available_at, attempts, created_at)
         VALUES ($1, $2, $3, $4, 0, $5)",
    )
    .bind(job_id)
    .bind(supplier_id)
    .bind(source)
    .bind(now + delay.as_secs() as i64)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Claim the next due item under a lease, or `None` when the queue is
/// drained (or every due item is serialized behind a sibling).
pub async fn claim(pool: &PgPool, lease: Duration) -> Result<Option<QueueItem>, CourierError> {
    let now = Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    let row: Option<(i64, Uuid, Uuid, String, i32)> = sqlx::query_as(
        "SELECT q.id, q.job_id, q.supplier_id, q.source, q.attempts
         FROM job_queue q
         WHERE q.available_at <= $1
           AND NOT EXISTS (
               SELECT 1 FROM job_queue other
               WHERE other.supplier_id = q.supplier_id
                 AND other.source = q.source
                 AND other.available_at > $1)
         ORDER BY q.available_at, q.id
         FOR UPDATE SKIP LOCKED
         LIMIT 1",
    )
    .bind(now)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((queue_id, job_id, supplier_id, source, attempts)) = row else {
        tx.commit().await?;
        return Ok(None);
    };

    let key = serialization_key(supplier_id, &source);
    let (locked,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_xact_lock($1)")
        .bind(key)
        .fetch_one(&mut *tx)
        .await?;
    if !locked {
        // A sibling is being claimed right now; come back shortly.
        sqlx::query("UPDATE job_queue SET available_at = $2 WHERE id = $1")
            .bind(queue_id)
            .bind(now + 5)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        return Ok(None);
    }

    sqlx::query("UPDATE job_queue SET available_at = $2, attempts = attempts + 1 WHERE id = $1")
        .bind(queue_id)
        .bind(now + lease.as_secs() as i64)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(Some(QueueItem {
        queue_id,
        job_id,
        supplier_id,
        source,
        attempt: (attempts + 1).max(1) as u32,
    }))
}

/// Drop a finished (or permanently failed) item.
pub async fn complete(pool: &PgPool, queue_id: i64) -> Result<(), CourierError> {
    sqlx::query("DELETE FROM job_queue WHERE id = $1")
        .bind(queue_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Put an item back with a delay (retry backoff).
pub async fn reschedule(
    pool: &PgPool,
    queue_id: i64,
    delay: Duration,
) -> Result<(), CourierError> {
    let now = Utc::now().timestamp();
    sqlx::query("UPDATE job_queue SET available_at = $2 WHERE id = $1")
        .bind(queue_id)
        .bind(now + delay.as_secs() as i64)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_key_is_stable_and_discriminating() {
        let supplier = Uuid::new_v4();
        let a = serialization_key(supplier, "csv:https://x.example/a.csv");
        let b = serialization_key(supplier, "csv:https://x.example/a.csv");
        let c = serialization_key(supplier, "csv:https://x.example/b.csv");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, serialization_key(Uuid::new_v4(), "csv:https://x.example/a.csv"));
    }
}
