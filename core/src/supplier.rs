//! Supplier identity, readable from both services.
//!
//! Suppliers are provisioned by an external admin path; this module only
//! reads them (the courier to gate enqueue, intelligence for category
//! scope and the matching flag).

use sqlx::PgPool;
use uuid::Uuid;

use crate::protocol::SourceKind;
use crate::store::StoreError;

/// One upstream data source.
#[derive(Debug, Clone)]
pub struct Supplier {
    pub id: Uuid,
    pub name: String,
    /// Location part of the source descriptor (URL or export reference).
    pub source_location: String,
    pub source_kind: SourceKind,
    /// Whether this supplier is ingested through the semantic ETL at all.
    pub semantic_etl_enabled: bool,
    /// Whether persisted items should be matched to canonical products.
    pub matching_enabled: bool,
}

type SupplierRow = (Uuid, String, String, String, bool, bool);

fn row_to_supplier(row: SupplierRow) -> Result<Supplier, StoreError> {
    let (id, name, source_location, source_kind, semantic_etl_enabled, matching_enabled) = row;
    let source_kind: SourceKind =
        source_kind
            .parse()
            .map_err(|message| StoreError::Corrupt {
                job_id: id,
                column: "source_kind",
                message,
            })?;
    Ok(Supplier {
        id,
        name,
        source_location,
        source_kind,
        semantic_etl_enabled,
        matching_enabled,
    })
}

/// Read handle over the `suppliers` table.
#[derive(Clone)]
pub struct SupplierStore {
    pool: PgPool,
}

impl SupplierStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, supplier_id: Uuid) -> Result<Option<Supplier>, StoreError> {
        let row: Option<SupplierRow> = sqlx::query_as(
            "SELECT id, name, source_location, source_kind, semantic_etl_enabled, matching_enabled
             FROM suppliers WHERE id = $1",
        )
        .bind(supplier_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_supplier).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_parses_source_kind() {
        let id = Uuid::new_v4();
        let supplier = row_to_supplier((
            id,
            "Acme Wholesale".into(),
            "https://example.com/price.xlsx".into(),
            "sheet_export".into(),
            true,
            false,
        ))
        .unwrap();
        assert_eq!(supplier.source_kind, SourceKind::SheetExport);
        assert!(supplier.semantic_etl_enabled);
        assert!(!supplier.matching_enabled);
    }

    #[test]
    fn test_row_rejects_unknown_kind() {
        let result = row_to_supplier((
            Uuid::new_v4(),
            "Acme".into(),
            "x".into(),
            "carrier_pigeon".into(),
            true,
            true,
        ));
        assert!(result.is_err());
    }
}
