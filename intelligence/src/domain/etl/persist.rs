//! Persister: batched upserts of deduplicated products.
//!
//! One transaction per batch. A unique-constraint conflict (possible only
//! if another ingestion races this one) downgrades the batch to per-row
//! transactions so one bad row cannot take the other ninety-nine with it.

use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::ExtractedProduct;
use crate::data::postgres::PostgresError;
use crate::data::postgres::repositories::items::{
    NewSupplierItem, UpsertOutcome, upsert_supplier_item,
};
use crate::utils::fingerprint::fingerprint;

/// What persistence accomplished.
#[derive(Debug, Default)]
pub struct PersistSummary {
    /// (index into the input slice, persisted item id), in input order.
    /// Conflicted rows are absent, so the pairing stays truthful.
    pub persisted: Vec<(usize, Uuid)>,
    /// Existing rows whose prices moved (price history was appended).
    pub price_changes: u64,
    /// Rows lost to constraint conflicts, with messages for the logs.
    pub conflicts: Vec<String>,
}

impl PersistSummary {
    pub fn item_ids(&self) -> Vec<Uuid> {
        self.persisted.iter().map(|(_, id)| *id).collect()
    }
}

fn to_new_item(supplier_id: Uuid, product: &ExtractedProduct) -> NewSupplierItem {
    NewSupplierItem {
        supplier_id,
        name: product.name.clone(),
        description: product.description.clone(),
        wholesale_price: product.wholesale_price,
        retail_price: product.retail_price,
        category_id: product.category_id,
        fingerprint: product.fingerprint.clone().unwrap_or_else(|| {
            fingerprint(
                &product.name,
                product.wholesale_price,
                product.retail_price,
                product.category_id,
            )
        }),
        raw: product.raw.clone(),
    }
}

fn is_unique_violation(error: &PostgresError) -> bool {
    match error {
        PostgresError::Database(sqlx::Error::Database(db)) => {
            db.code().as_deref() == Some("23505")
        }
        _ => false,
    }
}

/// Zero prices are legal on input only when positive after validation;
/// the extractor guarantees retail > 0, so this is a debug-time check.
fn assert_valid(product: &ExtractedProduct) {
    debug_assert!(product.retail_price > Decimal::ZERO);
}

async fn persist_batch(
    pool: &PgPool,
    supplier_id: Uuid,
    batch: &[ExtractedProduct],
) -> Result<Vec<UpsertOutcome>, PostgresError> {
    let mut tx = pool.begin().await?;
    let mut outcomes = Vec::with_capacity(batch.len());
    for product in batch {
        assert_valid(product);
        let item = to_new_item(supplier_id, product);
        outcomes.push(upsert_supplier_item(&mut *tx, &item).await?);
    }
    tx.commit().await?;
    Ok(outcomes)
}

/// Persist all products in batches of `batch_size`.
pub async fn persist_products(
    pool: &PgPool,
    supplier_id: Uuid,
    products: &[ExtractedProduct],
    batch_size: usize,
) -> Result<PersistSummary, PostgresError> {
    let mut summary = PersistSummary::default();
    let batch_size = batch_size.max(1);

    for (batch_index, batch) in products.chunks(batch_size).enumerate() {
        let base = batch_index * batch_size;
        match persist_batch(pool, supplier_id, batch).await {
            Ok(outcomes) => {
                for (offset, outcome) in outcomes.into_iter().enumerate() {
                    summary.persisted.push((base + offset, outcome.item_id));
                    if outcome.price_changed {
                        summary.price_changes += 1;
                    }
                }
            }
            Err(e) if is_unique_violation(&e) => {
                tracing::warn!(error = %e, "Batch hit a constraint conflict; retrying per row");
                for (offset, product) in batch.iter().enumerate() {
                    let item = to_new_item(supplier_id, product);
                    let mut tx = pool.begin().await?;
                    match upsert_supplier_item(&mut *tx, &item).await {
                        Ok(outcome) => {
                            tx.commit().await?;
                            summary.persisted.push((base + offset, outcome.item_id));
                            if outcome.price_changed {
                                summary.price_changes += 1;
                            }
                        }
                        Err(row_error) if is_unique_violation(&row_error) => {
                            tx.rollback().await.ok();
                            summary
                                .conflicts
                                .push(format!("'{}': {}", product.name, row_error));
                        }
                        Err(row_error) => {
                            tx.rollback().await.ok();
                            return Err(row_error);
                        }
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }

    Ok(summary)
}
