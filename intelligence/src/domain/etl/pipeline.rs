//! Analysis pipeline orchestrator.
//!
//! Runs the stages in order for one accepted analysis, updating phase,
//! progress and counters after each stage (and each chunk). Row errors
//! are logged and counted, chunk errors are logged and tolerated below
//! the failure ceiling, stage errors abort the analysis. Nothing here is
//! allowed to escape as a panic or kill the worker.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use pricedock_core::protocol::AnalysisResult;
use pricedock_core::supplier::SupplierStore;
use pricedock_core::{ErrorKind, JobCounters, JobPhase};

use super::chunker::chunk_ranges;
use super::dedup::dedup;
use super::extract::{ChunkOutcome, ExtractorConfig, extract_chunks};
use super::grid::NormalizedGrid;
use super::normalize::{Resolution, resolve};
use super::persist::persist_products;
use super::reader::{self, SourceDocument};
use super::sheet::SheetSelector;
use super::{ExtractedProduct, StageFailure};
use crate::data::postgres::PostgresError;
use crate::data::postgres::repositories::analyses::{
    Analysis, finalize_analysis, update_progress,
};
use crate::data::postgres::repositories::logs::{ParsingLog, insert_log};
use crate::data::postgres::repositories::reviews::create_review;
use crate::domain::categories::CategoryCache;
use crate::domain::matching::{Matcher, MatcherConfig};
use crate::llm::{ChatModel, EmbeddingModel};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunk_size_rows: usize,
    pub chunk_overlap_rows: usize,
    pub fuzzy_match_threshold: u8,
    pub extractor: ExtractorConfig,
    pub selector: SheetSelector,
    /// Persisted/seen ratio at which an erroring job still counts as a
    /// partial success.
    pub partial_success_ratio: f64,
    /// Failed-chunk ratio above which the whole analysis fails.
    pub chunk_failure_ceiling: f64,
    pub persist_batch_size: usize,
    pub matcher: MatcherConfig,
    pub matching_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size_rows: 250,
            chunk_overlap_rows: 40,
            fuzzy_match_threshold: 85,
            extractor: ExtractorConfig::default(),
            selector: SheetSelector::default(),
            partial_success_ratio: 0.80,
            chunk_failure_ceiling: 0.50,
            persist_batch_size: 100,
            matcher: MatcherConfig::default(),
            matching_enabled: true,
        }
    }
}

enum Abort {
    Stage(StageFailure),
    Db(PostgresError),
}

impl From<StageFailure> for Abort {
    fn from(failure: StageFailure) -> Self {
        Self::Stage(failure)
    }
}

impl From<PostgresError> for Abort {
    fn from(error: PostgresError) -> Self {
        Self::Db(error)
    }
}

impl Abort {
    fn into_parts(self) -> (ErrorKind, String) {
        match self {
            Self::Stage(failure) => (failure.kind, failure.message),
            Self::Db(error) => (ErrorKind::Unexpected, error.to_string()),
        }
    }
}

/// Terminal phase from the final counters.
///
/// `complete` needs zero errors and at least one persisted row;
/// `completed_with_errors` needs the partial-success ratio; anything
/// else failed, tagged with the dominant error kind.
fn terminal_phase(counters: &JobCounters, ratio: f64) -> (JobPhase, Option<ErrorKind>) {
    let errors = counters.errors_total();
    if errors == 0 && counters.rows_persisted > 0 {
        return (JobPhase::Complete, None);
    }
    if errors > 0 && counters.rows_seen > 0 {
        let persisted_ratio = counters.rows_persisted as f64 / counters.rows_seen as f64;
        if persisted_ratio >= ratio {
            return (JobPhase::CompletedWithErrors, None);
        }
    }
    (JobPhase::Failed, dominant_error_kind(counters))
}

/// The most frequent non-informational error kind, if any.
fn dominant_error_kind(counters: &JobCounters) -> Option<ErrorKind> {
    counters
        .errors_by_kind
        .iter()
        .filter(|(kind, count)| !kind.is_informational() && **count > 0)
        .max_by_key(|(_, count)| **count)
        .map(|(kind, _)| *kind)
}

fn build_grid(
    document: SourceDocument,
    selector: &SheetSelector,
) -> Result<NormalizedGrid, StageFailure> {
    let no_data = || StageFailure::new(ErrorKind::NoSuitableSheet, "no tabular data in file");
    match document {
        SourceDocument::Workbook(sheets) => {
            let sheet = selector.select(&sheets)?;
            NormalizedGrid::build(sheet.cells.clone(), &sheet.merges).ok_or_else(no_data)
        }
        SourceDocument::Tables(tables) => {
            let mut tables = tables.into_iter();
            let first = tables.next().ok_or_else(no_data)?;
            let mut grid = NormalizedGrid::build(first, &[]).ok_or_else(no_data)?;
            for table in tables {
                grid.append_table(table);
            }
            if grid.row_count() == 0 {
                return Err(no_data());
            }
            Ok(grid)
        }
    }
}

pub struct AnalysisPipeline {
    pool: PgPool,
    chat: Arc<dyn ChatModel>,
    embedder: Arc<dyn EmbeddingModel>,
    categories: Arc<CategoryCache>,
    suppliers: SupplierStore,
    config: PipelineConfig,
}

impl AnalysisPipeline {
    pub fn new(
        pool: PgPool,
        chat: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingModel>,
        categories: Arc<CategoryCache>,
        config: PipelineConfig,
    ) -> Self {
        let suppliers = SupplierStore::new(pool.clone());
        Self {
            pool,
            chat,
            embedder,
            categories,
            suppliers,
            config,
        }
    }

    /// Run one analysis to a terminal phase. Never panics outward; every
    /// failure path ends in `finalize_analysis`.
    pub async fn run(&self, analysis: Analysis) {
        let analysis_id = analysis.id;
        let mut counters = JobCounters::default();

        match self.execute(&analysis, &mut counters).await {
            Ok(()) => {}
            Err(abort) => {
                let (kind, message) = abort.into_parts();
                tracing::error!(
                    analysis_id = %analysis_id,
                    kind = %kind,
                    error = %message,
                    "Analysis aborted"
                );
                counters.record_error(kind);
                self.log_stage_failure(&analysis, kind, &message).await;
                if let Err(e) = finalize_analysis(
                    &self.pool,
                    analysis_id,
                    JobPhase::Failed,
                    &counters,
                    Some(kind),
                    None,
                )
                .await
                {
                    tracing::error!(analysis_id = %analysis_id, error = %e, "Cannot finalize failed analysis");
                }
            }
        }
    }

    async fn execute(
        &self,
        analysis: &Analysis,
        counters: &mut JobCounters,
    ) -> Result<(), Abort> {
        // --- Read & normalize the file ---------------------------------
        self.progress(analysis, JobPhase::Analyzing, 2, counters).await;

        let path = std::path::PathBuf::from(&analysis.file_path);
        let declared = analysis.file_kind;
        let selector = self.config.selector.clone();
        let document =
            tokio::task::block_in_place(|| reader::open(&path, declared))?;
        let grid = Arc::new(tokio::task::block_in_place(|| {
            build_grid(document, &selector)
        })?);

        counters.rows_seen = grid.row_count() as u64;
        tracing::debug!(
            analysis_id = %analysis.id,
            rows = counters.rows_seen,
            "Grid normalized"
        );
        self.progress(analysis, JobPhase::Extracting, 10, counters).await;

        // --- Chunked extraction ----------------------------------------
        let chunks = chunk_ranges(
            grid.row_count(),
            self.config.chunk_size_rows,
            self.config.chunk_overlap_rows,
        );
        let total_chunks = chunks.len();

        let on_progress = {
            let pool = self.pool.clone();
            let analysis_id = analysis.id;
            let base = counters.clone();
            move |done: usize, total: usize| {
                let pct = 10 + ((done as f64 / total.max(1) as f64) * 60.0) as u8;
                let pool = pool.clone();
                let snapshot = base.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        update_progress(&pool, analysis_id, JobPhase::Extracting, pct, &snapshot)
                            .await
                    {
                        tracing::warn!(analysis_id = %analysis_id, error = %e, "Progress update failed");
                    }
                });
            }
        };

        let outcomes = extract_chunks(
            Arc::clone(&self.chat),
            Arc::clone(&grid),
            chunks,
            self.config.extractor.clone(),
            on_progress,
        )
        .await;

        let mut products: Vec<ExtractedProduct> = Vec::new();
        let mut failed_chunks: Vec<(u32, ErrorKind, String)> = Vec::new();
        for ChunkOutcome {
            chunk_id,
            products: chunk_products,
            errors,
            failure,
        } in outcomes
        {
            products.extend(chunk_products);
            for error in errors {
                counters.record_error(error.kind);
                self.write_log(ParsingLog {
                    analysis_id: analysis.id,
                    job_id: analysis.job_id,
                    chunk_id: Some(error.chunk_id),
                    row_in_chunk: Some(error.row_in_chunk),
                    kind: error.kind,
                    message: error.message,
                    row_snapshot: error.snapshot,
                })
                .await;
            }
            if let Some((kind, message)) = failure {
                counters.record_error(kind);
                failed_chunks.push((chunk_id, kind, message.clone()));
                self.write_log(ParsingLog {
                    analysis_id: analysis.id,
                    job_id: analysis.job_id,
                    chunk_id: Some(chunk_id),
                    row_in_chunk: None,
                    kind,
                    message,
                    row_snapshot: None,
                })
                .await;
            }
        }
        counters.rows_extracted = products.len() as u64;

        // Too many dead chunks and the output is not trustworthy at all.
        if total_chunks > 0 {
            let failure_ratio = failed_chunks.len() as f64 / total_chunks as f64;
            if failure_ratio > self.config.chunk_failure_ceiling {
                let kind = failed_chunks
                    .iter()
                    .map(|(_, kind, _)| *kind)
                    .fold(HashMap::<ErrorKind, usize>::new(), |mut acc, kind| {
                        *acc.entry(kind).or_default() += 1;
                        acc
                    })
                    .into_iter()
                    .max_by_key(|(_, count)| *count)
                    .map(|(kind, _)| kind)
                    .unwrap_or(ErrorKind::ExtractionMalformed);
                return Err(StageFailure::new(
                    kind,
                    format!(
                        "{} of {} chunks failed extraction",
                        failed_chunks.len(),
                        total_chunks
                    ),
                )
                .into());
            }
        }

        // --- Category normalization ------------------------------------
        self.progress(analysis, JobPhase::Normalizing, 70, counters).await;

        let categories = self.categories.for_supplier(analysis.supplier_id).await?;
        let mut review_by_path: HashMap<Vec<String>, Uuid> = HashMap::new();

        for product in &mut products {
            match resolve(
                &categories,
                &product.category_path,
                self.config.fuzzy_match_threshold,
            ) {
                Resolution::Bound(matched) => {
                    product.category_id = Some(matched.category_id);
                }
                Resolution::NeedsReview { best } => {
                    counters.record_error(ErrorKind::CategoryUnresolved);
                    if !review_by_path.contains_key(&product.category_path) {
                        let review_id = create_review(
                            &self.pool,
                            analysis.job_id,
                            analysis.id,
                            &product.category_path,
                            best.map(|b| b.category_id),
                            best.map(|b| b.score).unwrap_or(0),
                        )
                        .await?;
                        review_by_path.insert(product.category_path.clone(), review_id);
                    }
                    self.write_log(ParsingLog {
                        analysis_id: analysis.id,
                        job_id: analysis.job_id,
                        chunk_id: None,
                        row_in_chunk: None,
                        kind: ErrorKind::CategoryUnresolved,
                        message: format!(
                            "category path {:?} unresolved for '{}'",
                            product.category_path, product.name
                        ),
                        row_snapshot: None,
                    })
                    .await;
                }
            }
        }

        // --- Dedup ------------------------------------------------------
        let outcome = dedup(products);
        counters.rows_deduped = outcome.products.len() as u64;
        counters.duplicates_removed = outcome.duplicates_removed;
        counters.record_errors(ErrorKind::DuplicateCollapsed, outcome.duplicates_removed);
        self.progress(analysis, JobPhase::Normalizing, 80, counters).await;

        // --- Persist ----------------------------------------------------
        let summary = persist_products(
            &self.pool,
            analysis.supplier_id,
            &outcome.products,
            self.config.persist_batch_size,
        )
        .await?;
        counters.rows_persisted = summary.persisted.len() as u64;
        counters.record_errors(ErrorKind::PersistConflict, summary.conflicts.len() as u64);
        for message in &summary.conflicts {
            self.write_log(ParsingLog {
                analysis_id: analysis.id,
                job_id: analysis.job_id,
                chunk_id: None,
                row_in_chunk: None,
                kind: ErrorKind::PersistConflict,
                message: message.clone(),
                row_snapshot: None,
            })
            .await;
        }
        tracing::debug!(
            analysis_id = %analysis.id,
            persisted = counters.rows_persisted,
            price_changes = summary.price_changes,
            "Persist finished"
        );

        // --- Matching (optional second stage) --------------------------
        let supplier = self
            .suppliers
            .get(analysis.supplier_id)
            .await
            .map_err(|e| Abort::Stage(StageFailure::new(ErrorKind::Unexpected, e.to_string())))?;
        let matching = self.config.matching_enabled
            && supplier.as_ref().is_some_and(|s| s.matching_enabled);

        if matching && !summary.persisted.is_empty() {
            self.progress(analysis, JobPhase::Matching, 90, counters).await;
            let matcher = Matcher::new(
                self.pool.clone(),
                Arc::clone(&self.chat),
                Arc::clone(&self.embedder),
                self.config.matcher.clone(),
            );
            let paired: Vec<(Uuid, ExtractedProduct)> = summary
                .persisted
                .iter()
                .map(|(index, item_id)| (*item_id, outcome.products[*index].clone()))
                .collect();
            let stats = matcher.match_items(&paired).await;
            for (kind, message) in stats.failures {
                counters.record_error(kind);
                self.write_log(ParsingLog {
                    analysis_id: analysis.id,
                    job_id: analysis.job_id,
                    chunk_id: None,
                    row_in_chunk: None,
                    kind,
                    message,
                    row_snapshot: None,
                })
                .await;
            }
        }

        // --- Finalize ---------------------------------------------------
        let (phase, error_kind) = terminal_phase(counters, self.config.partial_success_ratio);
        let result = AnalysisResult {
            supplier_item_ids: summary.item_ids(),
            review_ids: review_by_path.values().copied().collect(),
        };
        finalize_analysis(
            &self.pool,
            analysis.id,
            phase,
            counters,
            error_kind,
            Some(&result),
        )
        .await?;

        tracing::info!(
            analysis_id = %analysis.id,
            phase = %phase,
            rows_seen = counters.rows_seen,
            rows_persisted = counters.rows_persisted,
            duplicates_removed = counters.duplicates_removed,
            errors = counters.errors_total(),
            "Analysis finished"
        );
        Ok(())
    }

    async fn progress(
        &self,
        analysis: &Analysis,
        phase: JobPhase,
        pct: u8,
        counters: &JobCounters,
    ) {
        if let Err(e) = update_progress(&self.pool, analysis.id, phase, pct, counters).await {
            tracing::warn!(analysis_id = %analysis.id, error = %e, "Progress update failed");
        }
    }

    async fn write_log(&self, log: ParsingLog) {
        if let Err(e) = insert_log(&self.pool, &log).await {
            tracing::warn!(analysis_id = %log.analysis_id, error = %e, "Parsing log write failed");
        }
    }

    async fn log_stage_failure(&self, analysis: &Analysis, kind: ErrorKind, message: &str) {
        self.write_log(ParsingLog {
            analysis_id: analysis.id,
            job_id: analysis.job_id,
            chunk_id: None,
            row_in_chunk: None,
            kind,
            message: message.to_string(),
            row_snapshot: None,
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(seen: u64, persisted: u64, errors: &[(ErrorKind, u64)]) -> JobCounters {
        let mut counters = JobCounters {
            rows_seen: seen,
            rows_persisted: persisted,
            ..JobCounters::default()
        };
        for (kind, count) in errors {
            counters.record_errors(*kind, *count);
        }
        counters
    }

    #[test]
    fn test_clean_run_is_complete() {
        let counters = counters(300, 300, &[]);
        assert_eq!(
            terminal_phase(&counters, 0.80),
            (JobPhase::Complete, None)
        );
    }

    #[test]
    fn test_partial_success_at_eighty_percent() {
        // 500 rows, 90 bad prices, 410 persisted: 0.82 >= 0.80.
        let counters = counters(500, 410, &[(ErrorKind::RowPriceInvalid, 90)]);
        assert_eq!(
            terminal_phase(&counters, 0.80),
            (JobPhase::CompletedWithErrors, None)
        );
    }

    #[test]
    fn test_below_ratio_fails_with_dominant_kind() {
        let counters = counters(
            500,
            100,
            &[(ErrorKind::RowPriceInvalid, 390), (ErrorKind::RowNameMissing, 10)],
        );
        assert_eq!(
            terminal_phase(&counters, 0.80),
            (JobPhase::Failed, Some(ErrorKind::RowPriceInvalid))
        );
    }

    #[test]
    fn test_zero_persisted_zero_errors_fails() {
        let counters = counters(0, 0, &[]);
        let (phase, kind) = terminal_phase(&counters, 0.80);
        assert_eq!(phase, JobPhase::Failed);
        assert_eq!(kind, None);
    }

    #[test]
    fn test_duplicates_do_not_block_complete() {
        let mut c = counters(300, 260, &[]);
        c.duplicates_removed = 40;
        c.record_errors(ErrorKind::DuplicateCollapsed, 40);
        assert_eq!(terminal_phase(&c, 0.80), (JobPhase::Complete, None));
    }

    #[test]
    fn test_dominant_kind_ignores_informational() {
        let mut c = counters(10, 2, &[(ErrorKind::ExtractionTimeout, 3)]);
        c.record_errors(ErrorKind::DuplicateCollapsed, 100);
        assert_eq!(dominant_error_kind(&c), Some(ErrorKind::ExtractionTimeout));
    }
}
