//! Embedding storage and nearest-neighbour retrieval.
//!
//! Vectors go through plain SQL with `::vector` casts; cosine distance is
//! the `<=>` operator backed by the ivfflat index.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::data::postgres::PostgresError;

/// Who a vector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingOwner {
    SupplierItem,
    CanonicalProduct,
}

impl EmbeddingOwner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SupplierItem => "supplier_item",
            Self::CanonicalProduct => "canonical_product",
        }
    }
}

/// A knn candidate with its cosine similarity.
#[derive(Debug, Clone)]
pub struct KnnCandidate {
    pub product_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub score: f64,
}

/// Render a vector as a pgvector literal: `[v0,v1,…]`.
pub fn vector_literal(vector: &[f32]) -> String {
    let mut out = String::with_capacity(vector.len() * 10 + 2);
    out.push('[');
    for (i, v) in vector.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&v.to_string());
    }
    out.push(']');
    out
}

/// Store one vector per (owner, model), replacing any previous one.
pub async fn upsert_embedding(
    pool: &PgPool,
    owner_id: Uuid,
    owner_kind: EmbeddingOwner,
    model: &str,
    vector: &[f32],
) -> Result<(), PostgresError> {
    let now = Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO product_embeddings (owner_id, owner_kind, model, embedding, created_at)
         VALUES ($1, $2, $3, $4::vector, $5)
         ON CONFLICT (owner_id, owner_kind, model)
         DO UPDATE SET embedding = EXCLUDED.embedding, created_at = EXCLUDED.created_at",
    )
    .bind(owner_id)
    .bind(owner_kind.as_str())
    .bind(model)
    .bind(vector_literal(vector))
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Top-k canonical products by cosine similarity to `vector`.
pub async fn knn_canonical_products(
    pool: &PgPool,
    vector: &[f32],
    model: &str,
    k: u32,
) -> Result<Vec<KnnCandidate>, PostgresError> {
    let literal = vector_literal(vector);
    let rows: Vec<(Uuid, String, Option<String>, Option<String>, f64)> = sqlx::query_as(
        "SELECT p.id, p.name, p.description, p.category,
                1 - (e.embedding <=> $1::vector) AS score
         FROM product_embeddings e
         JOIN canonical_products p ON p.id = e.owner_id
         WHERE e.owner_kind = 'canonical_product' AND e.model = $2
         ORDER BY e.embedding <=> $1::vector
         LIMIT $3",
    )
    .bind(&literal)
    .bind(model)
    .bind(k as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(product_id, name, description, category, score)| KnnCandidate {
            product_id,
            name,
            description,
            category,
            score,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal_shape() {
        assert_eq!(vector_literal(&[0.0, -1.5, 2.25]), "[0,-1.5,2.25]");
        assert_eq!(vector_literal(&[]), "[]");
    }
}
