//! Supplier item persistence: upserts and price history.
//!
//! All functions here run on a caller-provided connection so the
//! persister can batch them inside one transaction.

use std::collections::BTreeMap;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::data::postgres::PostgresError;
use crate::utils::fingerprint::prices_within_tolerance;

/// Input to one upsert.
#[derive(Debug, Clone)]
pub struct NewSupplierItem {
    pub supplier_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub wholesale_price: Option<Decimal>,
    pub retail_price: Decimal,
    pub category_id: Option<Uuid>,
    pub fingerprint: String,
    pub raw: BTreeMap<String, String>,
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub item_id: Uuid,
    pub existed: bool,
    /// True when an existing row's prices moved beyond the 1% tolerance
    /// (a price-history row was appended).
    pub price_changed: bool,
}

fn price_moved(old: Option<Decimal>, new: Option<Decimal>) -> bool {
    match (old, new) {
        (Some(old), Some(new)) => !prices_within_tolerance(old, new),
        (None, None) => false,
        _ => true,
    }
}

/// Upsert one item on (supplier_id, fingerprint).
///
/// On update, non-price fields are overwritten (last write wins) and a
/// price-history row is appended if either price drifted by more than 1%.
pub async fn upsert_supplier_item(
    conn: &mut PgConnection,
    item: &NewSupplierItem,
) -> Result<UpsertOutcome, PostgresError> {
    let now = Utc::now().timestamp();
    let raw = serde_json::to_value(&item.raw)?;

    let existing: Option<(Uuid, Option<Decimal>, Decimal)> = sqlx::query_as(
        "SELECT id, wholesale_price, retail_price FROM supplier_items
         WHERE supplier_id = $1 AND fingerprint = $2
         FOR UPDATE",
    )
    .bind(item.supplier_id)
    .bind(&item.fingerprint)
    .fetch_optional(&mut *conn)
    .await?;

    match existing {
        Some((item_id, old_wholesale, old_retail)) => {
            let price_changed = price_moved(old_wholesale, item.wholesale_price)
                || price_moved(Some(old_retail), Some(item.retail_price));

            sqlx::query(
                "UPDATE supplier_items SET
                     name = $2, description = $3, wholesale_price = $4, retail_price = $5,
                     category_id = $6, raw = $7, updated_at = $8
                 WHERE id = $1",
            )
            .bind(item_id)
            .bind(&item.name)
            .bind(&item.description)
            .bind(item.wholesale_price)
            .bind(item.retail_price)
            .bind(item.category_id)
            .bind(&raw)
            .bind(now)
            .execute(&mut *conn)
            .await?;

            if price_changed {
                insert_price_history(conn, item_id, item.wholesale_price, item.retail_price).await?;
            }

            Ok(UpsertOutcome {
                item_id,
                existed: true,
                price_changed,
            })
        }
        None => {
            let item_id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO supplier_items
                     (id, supplier_id, name, description, wholesale_price, retail_price,
                      category_id, fingerprint, raw, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)",
            )
            .bind(item_id)
            .bind(item.supplier_id)
            .bind(&item.name)
            .bind(&item.description)
            .bind(item.wholesale_price)
            .bind(item.retail_price)
            .bind(item.category_id)
            .bind(&item.fingerprint)
            .bind(&raw)
            .bind(now)
            .execute(&mut *conn)
            .await?;

            Ok(UpsertOutcome {
                item_id,
                existed: false,
                price_changed: false,
            })
        }
    }
}

/// Append one price observation.
pub async fn insert_price_history(
    conn: &mut PgConnection,
    item_id: Uuid,
    wholesale_price: Option<Decimal>,
    retail_price: Decimal,
) -> Result<(), PostgresError> {
    let now = Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO price_history (supplier_item_id, wholesale_price, retail_price, captured_at)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(item_id)
    .bind(wholesale_price)
    .bind(retail_price)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Set the canonical-product link on an item (matcher auto-link).
pub async fn link_canonical_product(
    conn: &mut PgConnection,
    item_id: Uuid,
    product_id: Uuid,
) -> Result<(), PostgresError> {
    let now = Utc::now().timestamp();
    sqlx::query(
        "UPDATE supplier_items SET canonical_product_id = $2, updated_at = $3 WHERE id = $1",
    )
    .bind(item_id)
    .bind(product_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_moved_respects_tolerance() {
        assert!(!price_moved(Some(dec!(99.00)), Some(dec!(99.50))));
        assert!(price_moved(Some(dec!(100.00)), Some(dec!(110.00))));
        assert!(price_moved(None, Some(dec!(10.00))));
        assert!(price_moved(Some(dec!(10.00)), None));
        assert!(!price_moved(None, None));
    }
}
