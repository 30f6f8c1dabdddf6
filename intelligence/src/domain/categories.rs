//! In-memory category taxonomy cache.
//!
//! Read-heavy: every extracted product consults the active category set
//! for its supplier scope. Entries refresh after a TTL, and a cheap
//! (count, max updated_at) version probe avoids reloading an unchanged
//! taxonomy. `invalidate` drops everything immediately for callers that
//! know the table changed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use sqlx::PgPool;
use uuid::Uuid;

use crate::data::postgres::PostgresError;
use crate::data::postgres::repositories::categories::{
    Category, list_active_for_scope, taxonomy_version,
};

struct ScopeEntry {
    loaded_at: Instant,
    version: (i64, i64),
    categories: Arc<Vec<Category>>,
}

/// Per-process cache of active categories, keyed by supplier scope.
pub struct CategoryCache {
    pool: PgPool,
    ttl: Duration,
    scopes: RwLock<HashMap<Uuid, ScopeEntry>>,
}

impl CategoryCache {
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self {
            pool,
            ttl,
            scopes: RwLock::new(HashMap::new()),
        }
    }

    /// Active categories visible to `supplier_id` (supplier-scoped rows
    /// first, then global).
    pub async fn for_supplier(
        &self,
        supplier_id: Uuid,
    ) -> Result<Arc<Vec<Category>>, PostgresError> {
        {
            let scopes = self.scopes.read();
            if let Some(entry) = scopes.get(&supplier_id) {
                if entry.loaded_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(&entry.categories));
                }
            }
        }

        // TTL expired (or never loaded): probe the version before paying
        // for a full reload.
        let version = taxonomy_version(&self.pool).await?;
        {
            let mut scopes = self.scopes.write();
            if let Some(entry) = scopes.get_mut(&supplier_id) {
                if entry.version == version {
                    entry.loaded_at = Instant::now();
                    return Ok(Arc::clone(&entry.categories));
                }
            }
        }

        let categories = Arc::new(list_active_for_scope(&self.pool, supplier_id).await?);
        tracing::debug!(
            supplier_id = %supplier_id,
            count = categories.len(),
            "Category scope reloaded"
        );

        let mut scopes = self.scopes.write();
        scopes.insert(
            supplier_id,
            ScopeEntry {
                loaded_at: Instant::now(),
                version,
                categories: Arc::clone(&categories),
            },
        );
        Ok(categories)
    }

    /// Drop every cached scope. Called when a category row is known to
    /// have changed.
    pub fn invalidate(&self) {
        self.scopes.write().clear();
        tracing::debug!("Category cache invalidated");
    }
}
