//! Canonical-product matcher: embed, retrieve, adjudicate, route.
//!
//! Runs after persistence for suppliers with matching enabled. Per item:
//! embed a stable text concatenation, retrieve top-k canonical products
//! by cosine similarity, have the LLM score the candidates, then route
//! on confidence: auto-link, review queue, or reject. Failures demote
//! gracefully and never abort the job.

pub mod adjudicate;

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use pricedock_core::ErrorKind;
use pricedock_core::retry::{RetryPolicy, retry};

use self::adjudicate::adjudicate;
use super::etl::ExtractedProduct;
use crate::data::postgres::repositories::embeddings::{
    EmbeddingOwner, knn_canonical_products, upsert_embedding,
};
use crate::data::postgres::repositories::items::link_canonical_product;
use crate::data::postgres::repositories::matches::enqueue_match_review;
use crate::llm::{ChatModel, EmbeddingModel};

/// Embedding calls retry up to 3 times with exponential backoff.
const EMBED_RETRY: RetryPolicy = RetryPolicy::new(
    3,
    Duration::from_millis(500),
    2,
    Duration::from_secs(5),
);

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Confidence at or above which an item auto-links.
    pub auto_threshold: f64,
    /// Confidence at or above which (but below auto) a review is queued.
    pub review_threshold: f64,
    pub knn_k: u32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            auto_threshold: 0.90,
            review_threshold: 0.70,
            knn_k: 5,
        }
    }
}

/// Outcome counters plus loggable failures.
#[derive(Debug, Default)]
pub struct MatchStats {
    pub auto_linked: u64,
    pub queued_for_review: u64,
    pub rejected: u64,
    pub failures: Vec<(ErrorKind, String)>,
}

/// Stable text for embedding: name, description, category leaf.
fn embedding_text(product: &ExtractedProduct) -> String {
    let mut text = product.name.clone();
    if let Some(description) = &product.description {
        text.push('\n');
        text.push_str(description);
    }
    if let Some(leaf) = product.category_path.last() {
        text.push('\n');
        text.push_str(leaf);
    }
    text
}

pub struct Matcher {
    pool: PgPool,
    chat: Arc<dyn ChatModel>,
    embedder: Arc<dyn EmbeddingModel>,
    config: MatcherConfig,
}

impl Matcher {
    pub fn new(
        pool: PgPool,
        chat: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingModel>,
        config: MatcherConfig,
    ) -> Self {
        Self {
            pool,
            chat,
            embedder,
            config,
        }
    }

    /// Match every (item id, product) pair; items are processed in order
    /// and failures are collected, not raised.
    pub async fn match_items(&self, items: &[(Uuid, ExtractedProduct)]) -> MatchStats {
        let mut stats = MatchStats::default();

        for (item_id, product) in items {
            if let Err((kind, message)) = self.match_one(*item_id, product, &mut stats).await {
                tracing::warn!(item_id = %item_id, kind = %kind, error = %message, "Match failed");
                stats.failures.push((kind, message));
            }
        }

        tracing::debug!(
            auto_linked = stats.auto_linked,
            queued = stats.queued_for_review,
            rejected = stats.rejected,
            failures = stats.failures.len(),
            "Matching finished"
        );
        stats
    }

    async fn match_one(
        &self,
        item_id: Uuid,
        product: &ExtractedProduct,
        stats: &mut MatchStats,
    ) -> Result<(), (ErrorKind, String)> {
        let text = embedding_text(product);

        let vector = retry(&EMBED_RETRY, || self.embedder.embed(&text))
            .await
            .map_err(|(e, attempts)| {
                (
                    ErrorKind::EmbeddingFailed,
                    format!("embedding failed after {} attempts: {}", attempts, e),
                )
            })?;

        upsert_embedding(
            &self.pool,
            item_id,
            EmbeddingOwner::SupplierItem,
            self.embedder.model_id(),
            &vector,
        )
        .await
        .map_err(|e| (ErrorKind::EmbeddingFailed, e.to_string()))?;

        let candidates = knn_canonical_products(
            &self.pool,
            &vector,
            self.embedder.model_id(),
            self.config.knn_k,
        )
        .await
        .map_err(|e| (ErrorKind::EmbeddingFailed, e.to_string()))?;

        if candidates.is_empty() {
            stats.rejected += 1;
            return Ok(());
        }

        match adjudicate(
            self.chat.as_ref(),
            &product.name,
            product.description.as_deref(),
            product.category_path.last().map(String::as_str),
            &candidates,
        )
        .await
        {
            Ok(adjudications) => {
                let best = adjudications
                    .iter()
                    .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
                match best {
                    Some(best) if best.confidence >= self.config.auto_threshold => {
                        let mut conn = self
                            .pool
                            .acquire()
                            .await
                            .map_err(|e| (ErrorKind::Unexpected, e.to_string()))?;
                        link_canonical_product(&mut *conn, item_id, best.product_id)
                            .await
                            .map_err(|e| (ErrorKind::Unexpected, e.to_string()))?;
                        stats.auto_linked += 1;
                    }
                    Some(best) if best.confidence >= self.config.review_threshold => {
                        enqueue_match_review(
                            &self.pool,
                            item_id,
                            best.product_id,
                            best.confidence,
                            Some(&best.reasoning),
                        )
                        .await
                        .map_err(|e| (ErrorKind::Unexpected, e.to_string()))?;
                        stats.queued_for_review += 1;
                    }
                    _ => {
                        tracing::debug!(item_id = %item_id, "No candidate above the review threshold");
                        stats.rejected += 1;
                    }
                }
                Ok(())
            }
            Err(reason) => {
                // Adjudication failure demotes to review at the best
                // candidate's similarity score.
                if let Some(nearest) = candidates
                    .iter()
                    .max_by(|a, b| a.score.total_cmp(&b.score))
                {
                    enqueue_match_review(
                        &self.pool,
                        item_id,
                        nearest.product_id,
                        nearest.score.clamp(0.0, 1.0),
                        None,
                    )
                    .await
                    .map_err(|e| (ErrorKind::Unexpected, e.to_string()))?;
                    stats.queued_for_review += 1;
                }
                Err((ErrorKind::AdjudicationFailed, reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    #[test]
    fn test_embedding_text_is_stable_concatenation() {
        let product = ExtractedProduct {
            name: "USB Hub".into(),
            description: Some("7 ports".into()),
            wholesale_price: None,
            retail_price: dec!(19.99),
            category_path: vec!["Electronics".into(), "Hubs".into()],
            raw: BTreeMap::new(),
            category_id: None,
            fingerprint: None,
        };
        assert_eq!(embedding_text(&product), "USB Hub\n7 ports\nHubs");

        let bare = ExtractedProduct {
            description: None,
            category_path: Vec::new(),
            ..product
        };
        assert_eq!(embedding_text(&bare), "USB Hub");
    }

    #[test]
    fn test_default_routing_thresholds() {
        let config = MatcherConfig::default();
        assert_eq!(config.auto_threshold, 0.90);
        assert_eq!(config.review_threshold, 0.70);
        assert_eq!(config.knn_k, 5);
    }
}
