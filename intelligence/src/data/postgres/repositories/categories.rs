//! Category taxonomy repository.

use sqlx::PgPool;
use uuid::Uuid;

use crate::data::postgres::PostgresError;

/// One taxonomy node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
    /// `None` means global scope.
    pub supplier_id: Option<Uuid>,
    pub needs_review: bool,
    pub is_active: bool,
}

type CategoryRow = (Uuid, String, Option<Uuid>, Option<Uuid>, bool, bool);

fn row_to_category(row: CategoryRow) -> Category {
    let (id, name, parent_id, supplier_id, needs_review, is_active) = row;
    Category {
        id,
        name,
        parent_id,
        supplier_id,
        needs_review,
        is_active,
    }
}

/// Active categories visible to one supplier: supplier-scoped rows first,
/// then global rows. Inactive categories are excluded from matching but
/// kept in the table for history.
pub async fn list_active_for_scope(
    pool: &PgPool,
    supplier_id: Uuid,
) -> Result<Vec<Category>, PostgresError> {
    let rows: Vec<CategoryRow> = sqlx::query_as(
        "SELECT id, name, parent_id, supplier_id, needs_review, is_active
         FROM categories
         WHERE is_active AND (supplier_id = $1 OR supplier_id IS NULL)
         ORDER BY supplier_id NULLS LAST, id",
    )
    .bind(supplier_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_category).collect())
}

/// Cheap change detector for the in-memory cache: row count plus the
/// latest updated_at. Any insert, update or delete moves at least one of
/// the two.
pub async fn taxonomy_version(pool: &PgPool) -> Result<(i64, i64), PostgresError> {
    let row: (i64, Option<i64>) =
        sqlx::query_as("SELECT COUNT(*), MAX(updated_at) FROM categories")
            .fetch_one(pool)
            .await?;
    Ok((row.0, row.1.unwrap_or(0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_to_category_maps_scope() {
        let supplier = Uuid::new_v4();
        let category = row_to_category((
            Uuid::new_v4(),
            "Cables".into(),
            None,
            Some(supplier),
            false,
            true,
        ));
        assert_eq!(category.supplier_id, Some(supplier));
        assert!(category.is_active);
        assert!(category.parent_id.is_none());
    }
}
