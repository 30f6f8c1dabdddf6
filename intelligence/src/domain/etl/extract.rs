//! LLM extraction stage: one chat call per chunk, typed rows out.
//!
//! Malformed responses retry on halved windows (the rows are split, both
//! halves re-extracted) up to the configured depth; a chunk that still
//! fails becomes a chunk-level error and the pipeline moves on. Chunks
//! run with bounded, adaptive parallelism and are collated back into
//! chunk order before dedup.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::task::JoinSet;

use pricedock_core::ErrorKind;

use super::chunker::Chunk;
use super::grid::NormalizedGrid;
use super::{ExtractedProduct, RowError};
use crate::llm::{ChatModel, ChatRequest};

/// Fixed extraction contract. The wire field names (`price_opt`,
/// `price_rrc`) are part of the prompt and must not drift from the
/// parser below.
const SYSTEM_PROMPT: &str = "\
You extract product rows from a Markdown price list table.\n\
Respond with a JSON array only. No prose, no code fences.\n\
Each element is an object: {\"name\": string, \"description\": string (optional), \
\"price_opt\": number (optional wholesale price), \"price_rrc\": number (retail price), \
\"category_path\": array of strings from root to leaf (optional)}.\n\
Prices are decimals with a dot as the separator.\n\
Skip rows that are headers, separators, section titles or totals.";

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub temperature: f32,
    pub seed: Option<u64>,
    /// How many times a malformed chunk is split in half and re-tried.
    pub retry_attempts: u32,
    /// Wall-clock budget per chunk, including retries.
    pub chunk_timeout: Duration,
    /// Upper bound on parallel LLM calls.
    pub concurrency: usize,
    /// Completion latency above which concurrency steps down.
    pub latency_backoff_threshold: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            seed: Some(0),
            retry_attempts: 2,
            chunk_timeout: Duration::from_secs(60),
            concurrency: 2,
            latency_backoff_threshold: Duration::from_secs(8),
        }
    }
}

/// Everything one chunk produced.
#[derive(Debug)]
pub struct ChunkOutcome {
    pub chunk_id: u32,
    pub products: Vec<ExtractedProduct>,
    pub errors: Vec<RowError>,
    /// Chunk-level failure; when set, `products` is empty.
    pub failure: Option<(ErrorKind, String)>,
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// The LLM's view of one row, before validation.
#[derive(Debug, Deserialize)]
struct RawRow {
    name: Option<String>,
    description: Option<String>,
    price_opt: Option<serde_json::Value>,
    price_rrc: Option<serde_json::Value>,
    category_path: Option<Vec<String>>,
}

/// Tolerate a fenced code block around the JSON array.
fn strip_fences(body: &str) -> &str {
    let trimmed = body.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn parse_array(body: &str) -> Result<Vec<serde_json::Value>, String> {
    let value: serde_json::Value =
        serde_json::from_str(strip_fences(body)).map_err(|e| format!("not JSON: {}", e))?;
    match value {
        serde_json::Value::Array(elements) => Ok(elements),
        other => Err(format!("expected a JSON array, got {}", kind_name(&other))),
    }
}

fn kind_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn parse_price(value: &serde_json::Value) -> Result<Decimal, String> {
    match value {
        serde_json::Value::Number(n) => {
            Decimal::from_str(&n.to_string()).map_err(|e| e.to_string())
        }
        serde_json::Value::String(s) => {
            Decimal::from_str(s.trim()).map_err(|e| e.to_string())
        }
        other => Err(format!("price is {}", kind_name(other))),
    }
}

/// Stringify the raw element into the audit map.
fn raw_map(value: &serde_json::Value) -> BTreeMap<String, String> {
    let serde_json::Value::Object(object) = value else {
        return BTreeMap::new();
    };
    object
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), rendered)
        })
        .collect()
}

/// Validate one response element into a product or a row error.
fn validate_row(
    element: &serde_json::Value,
    chunk_id: u32,
    row_in_chunk: u32,
) -> Result<ExtractedProduct, RowError> {
    let row_error = |kind: ErrorKind, message: String| RowError {
        chunk_id,
        row_in_chunk,
        kind,
        message,
        snapshot: Some(element.clone()),
    };

    if !element.is_object() {
        return Err(row_error(
            ErrorKind::RowSchemaInvalid,
            format!("row element is {}", kind_name(element)),
        ));
    }
    let raw: RawRow = serde_json::from_value(element.clone()).map_err(|e| {
        row_error(ErrorKind::RowSchemaInvalid, format!("row shape invalid: {}", e))
    })?;

    let name = raw.name.as_deref().map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(row_error(
            ErrorKind::RowNameMissing,
            "row has no product name".to_string(),
        ));
    }

    let retail = match &raw.price_rrc {
        None | Some(serde_json::Value::Null) => {
            return Err(row_error(
                ErrorKind::RowPriceInvalid,
                "row has no retail price".to_string(),
            ));
        }
        Some(value) => match parse_price(value) {
            Ok(price) if price > Decimal::ZERO => price,
            Ok(price) => {
                return Err(row_error(
                    ErrorKind::RowPriceInvalid,
                    format!("retail price {} is not positive", price),
                ));
            }
            Err(e) => {
                return Err(row_error(
                    ErrorKind::RowPriceInvalid,
                    format!("retail price unparseable: {}", e),
                ));
            }
        },
    };

    // Wholesale is optional and never fails a row; garbage degrades to
    // absent.
    let wholesale = raw
        .price_opt
        .as_ref()
        .filter(|v| !v.is_null())
        .and_then(|value| match parse_price(value) {
            Ok(price) if price >= Decimal::ZERO => Some(price),
            _ => {
                tracing::debug!(chunk_id, row_in_chunk, "Ignoring unparseable wholesale price");
                None
            }
        });

    Ok(ExtractedProduct {
        name: name.to_string(),
        description: raw
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
        wholesale_price: wholesale,
        retail_price: retail,
        category_path: raw
            .category_path
            .unwrap_or_default()
            .into_iter()
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        raw: raw_map(element),
        category_id: None,
        fingerprint: None,
    })
}

// ---------------------------------------------------------------------------
// Per-chunk extraction with halving retries
// ---------------------------------------------------------------------------

fn build_user_message(grid: &NormalizedGrid, start: usize, end: usize) -> String {
    format!(
        "Columns: {}\n\n{}",
        grid.header().join(" | "),
        grid.to_markdown_range(start, end)
    )
}

/// Extract rows `[start, end)`. On a malformed response the range is
/// split in half and both halves are re-extracted, up to `depth_left`
/// levels deep.
fn extract_range<'a>(
    chat: &'a dyn ChatModel,
    grid: &'a NormalizedGrid,
    config: &'a ExtractorConfig,
    chunk_id: u32,
    chunk_start: usize,
    start: usize,
    end: usize,
    depth_left: u32,
) -> BoxFuture<'a, Result<(Vec<ExtractedProduct>, Vec<RowError>), String>> {
    async move {
        let request = ChatRequest {
            system: SYSTEM_PROMPT.to_string(),
            user: build_user_message(grid, start, end),
            temperature: config.temperature,
            seed: config.seed,
        };

        let malformed = match chat.complete(&request).await {
            Ok(body) => match parse_array(&body) {
                Ok(elements) => {
                    let mut products = Vec::new();
                    let mut errors = Vec::new();
                    for (index, element) in elements.iter().enumerate() {
                        let row_in_chunk = (start - chunk_start + index) as u32;
                        match validate_row(element, chunk_id, row_in_chunk) {
                            Ok(product) => products.push(product),
                            Err(error) => errors.push(error),
                        }
                    }
                    return Ok((products, errors));
                }
                Err(reason) => reason,
            },
            Err(e) => e.to_string(),
        };

        if depth_left == 0 || end - start < 2 {
            return Err(malformed);
        }

        let mid = start + (end - start) / 2;
        tracing::warn!(
            chunk_id,
            start,
            end,
            reason = %malformed,
            "Malformed extraction, retrying on halved windows"
        );

        let (left, right) = futures::join!(
            extract_range(chat, grid, config, chunk_id, chunk_start, start, mid, depth_left - 1),
            extract_range(chat, grid, config, chunk_id, chunk_start, mid, end, depth_left - 1),
        );
        let (mut products, mut errors) = left?;
        let (right_products, right_errors) = right?;
        products.extend(right_products);
        errors.extend(right_errors);
        Ok((products, errors))
    }
    .boxed()
}

/// Run one chunk to completion, classifying chunk-level failures.
async fn extract_chunk(
    chat: &dyn ChatModel,
    grid: &NormalizedGrid,
    config: &ExtractorConfig,
    chunk: Chunk,
) -> ChunkOutcome {
    let work = extract_range(
        chat,
        grid,
        config,
        chunk.id,
        chunk.start,
        chunk.start,
        chunk.end,
        config.retry_attempts,
    );

    match tokio::time::timeout(config.chunk_timeout, work).await {
        Ok(Ok((products, errors))) => ChunkOutcome {
            chunk_id: chunk.id,
            products,
            errors,
            failure: None,
        },
        Ok(Err(reason)) => ChunkOutcome {
            chunk_id: chunk.id,
            products: Vec::new(),
            errors: Vec::new(),
            failure: Some((ErrorKind::ExtractionMalformed, reason)),
        },
        Err(_) => ChunkOutcome {
            chunk_id: chunk.id,
            products: Vec::new(),
            errors: Vec::new(),
            failure: Some((
                ErrorKind::ExtractionTimeout,
                format!("chunk exceeded {}s budget", config.chunk_timeout.as_secs()),
            )),
        },
    }
}

// ---------------------------------------------------------------------------
// Bounded, adaptive, order-collating scheduler
// ---------------------------------------------------------------------------

/// Extract every chunk with at most `concurrency` calls in flight.
///
/// Completions above the latency threshold step the limit down one;
/// healthy completions step it back up. Results come back in chunk-index
/// order regardless of completion order. `on_progress` fires after each
/// chunk with (done, total).
pub async fn extract_chunks(
    chat: Arc<dyn ChatModel>,
    grid: Arc<NormalizedGrid>,
    chunks: Vec<Chunk>,
    config: ExtractorConfig,
    mut on_progress: impl FnMut(usize, usize),
) -> Vec<ChunkOutcome> {
    let total = chunks.len();
    let mut slots: Vec<Option<ChunkOutcome>> = Vec::new();
    slots.resize_with(total, || None);

    let mut limit = config.concurrency.max(1);
    let mut next = 0usize;
    let mut done = 0usize;
    let mut in_flight: JoinSet<(usize, ChunkOutcome, Duration)> = JoinSet::new();
    let config = Arc::new(config);

    while done < total {
        while in_flight.len() < limit && next < total {
            let chunk = chunks[next];
            let index = next;
            let chat = Arc::clone(&chat);
            let grid = Arc::clone(&grid);
            let config = Arc::clone(&config);
            in_flight.spawn(async move {
                let started = std::time::Instant::now();
                let outcome = extract_chunk(chat.as_ref(), &grid, &config, chunk).await;
                (index, outcome, started.elapsed())
            });
            next += 1;
        }

        let Some(joined) = in_flight.join_next().await else {
            break;
        };
        match joined {
            Ok((index, outcome, latency)) => {
                if latency > config.latency_backoff_threshold {
                    if limit > 1 {
                        limit -= 1;
                        tracing::debug!(limit, latency_ms = latency.as_millis() as u64,
                            "LLM latency high, stepping concurrency down");
                    }
                } else if limit < config.concurrency {
                    limit += 1;
                }
                slots[index] = Some(outcome);
            }
            Err(e) => {
                // A panicked extraction task must not kill the job; the
                // affected slot is filled during the sweep below.
                tracing::error!(error = %e, "Extraction task panicked");
            }
        }
        done += 1;
        on_progress(done, total);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| ChunkOutcome {
                chunk_id: chunks[index].id,
                products: Vec::new(),
                errors: Vec::new(),
                failure: Some((ErrorKind::Unexpected, "extraction task died".to_string())),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_grid(rows: usize) -> NormalizedGrid {
        let mut cells = vec![vec![
            "Name".to_string(),
            "Retail".to_string(),
            "Category".to_string(),
        ]];
        for i in 0..rows {
            cells.push(vec![
                format!("Item {}", i),
                format!("{}.00", 10 + i),
                "Cables".to_string(),
            ]);
        }
        NormalizedGrid::build(cells, &[]).unwrap()
    }

    /// Fake model that answers every request by parsing the Markdown rows
    /// it was sent back into the response schema.
    struct EchoModel;

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
            let rows: Vec<serde_json::Value> = request
                .user
                .lines()
                .skip(3) // columns line, blank, header
                .skip(1) // separator
                .map(|line| {
                    let cells: Vec<&str> = line
                        .trim_matches('|')
                        .split('|')
                        .map(str::trim)
                        .collect();
                    serde_json::json!({
                        "name": cells[0],
                        "price_rrc": cells[1],
                        "category_path": [cells[2]],
                    })
                })
                .collect();
            Ok(serde_json::to_string(&rows).unwrap())
        }
    }

    /// Fails with prose until the window shrinks to `threshold` rows.
    struct FlakyModel {
        threshold: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatModel for FlakyModel {
        async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let data_rows = request.user.lines().count().saturating_sub(4);
            if data_rows > self.threshold {
                return Ok("I'm sorry, that table is too long for me.".to_string());
            }
            EchoModel.complete(request).await
        }
    }

    struct AlwaysBroken;

    #[async_trait]
    impl ChatModel for AlwaysBroken {
        async fn complete(&self, _request: &ChatRequest) -> Result<String, LlmError> {
            Err(LlmError::Status {
                status: 503,
                body: "upstream down".into(),
            })
        }
    }

    struct SlowModel;

    #[async_trait]
    impl ChatModel for SlowModel {
        async fn complete(&self, _request: &ChatRequest) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("[]".to_string())
        }
    }

    fn config() -> ExtractorConfig {
        ExtractorConfig {
            chunk_timeout: Duration::from_secs(5),
            ..ExtractorConfig::default()
        }
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("[1]"), "[1]");
        assert_eq!(strip_fences("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_fences("```\n[]\n```"), "[]");
    }

    #[test]
    fn test_validate_row_happy_path() {
        let element = serde_json::json!({
            "name": " USB Hub ",
            "description": "7 ports",
            "price_opt": "11.00",
            "price_rrc": 19.99,
            "category_path": ["Electronics", "Hubs"],
        });
        let product = validate_row(&element, 0, 3).unwrap();
        assert_eq!(product.name, "USB Hub");
        assert_eq!(product.retail_price, dec!(19.99));
        assert_eq!(product.wholesale_price, Some(dec!(11.00)));
        assert_eq!(product.category_path, vec!["Electronics", "Hubs"]);
        assert_eq!(product.raw["name"], " USB Hub ");
    }

    #[test]
    fn test_validate_row_failures_classify() {
        let no_name = serde_json::json!({"price_rrc": 5});
        assert_eq!(
            validate_row(&no_name, 0, 0).unwrap_err().kind,
            ErrorKind::RowNameMissing
        );

        let bad_price = serde_json::json!({"name": "X", "price_rrc": "N/A"});
        assert_eq!(
            validate_row(&bad_price, 0, 0).unwrap_err().kind,
            ErrorKind::RowPriceInvalid
        );

        let zero_price = serde_json::json!({"name": "X", "price_rrc": 0});
        assert_eq!(
            validate_row(&zero_price, 0, 0).unwrap_err().kind,
            ErrorKind::RowPriceInvalid
        );

        let not_object = serde_json::json!("just a string");
        assert_eq!(
            validate_row(&not_object, 0, 0).unwrap_err().kind,
            ErrorKind::RowSchemaInvalid
        );
    }

    #[test]
    fn test_bad_wholesale_degrades_to_absent() {
        let element = serde_json::json!({"name": "X", "price_opt": "call us", "price_rrc": 5});
        let product = validate_row(&element, 0, 0).unwrap();
        assert_eq!(product.wholesale_price, None);
    }

    #[tokio::test]
    async fn test_extract_all_rows_in_order() {
        let grid = Arc::new(test_grid(30));
        let chunks = crate::domain::etl::chunker::chunk_ranges(30, 10, 2);
        let outcomes = extract_chunks(
            Arc::new(EchoModel),
            grid,
            chunks,
            config(),
            |_, _| {},
        )
        .await;

        assert!(outcomes.iter().all(|o| o.failure.is_none()));
        let ids: Vec<u32> = outcomes.iter().map(|o| o.chunk_id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert!(outcomes[0].products[0].name.starts_with("Item "));
    }

    #[tokio::test]
    async fn test_malformed_splits_until_small_enough() {
        let grid = Arc::new(test_grid(16));
        let chunks = crate::domain::etl::chunker::chunk_ranges(16, 16, 0);
        let model = Arc::new(FlakyModel {
            threshold: 4,
            calls: AtomicUsize::new(0),
        });
        let outcomes = extract_chunks(model.clone(), grid, chunks, config(), |_, _| {}).await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].failure.is_none());
        assert_eq!(outcomes[0].products.len(), 16);
        assert!(model.calls.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_persistent_failure_is_chunk_error() {
        let grid = Arc::new(test_grid(8));
        let chunks = crate::domain::etl::chunker::chunk_ranges(8, 8, 0);
        let outcomes =
            extract_chunks(Arc::new(AlwaysBroken), grid, chunks, config(), |_, _| {}).await;

        let failure = outcomes[0].failure.as_ref().unwrap();
        assert_eq!(failure.0, ErrorKind::ExtractionMalformed);
    }

    #[tokio::test]
    async fn test_timeout_classifies_separately() {
        let grid = Arc::new(test_grid(8));
        let chunks = crate::domain::etl::chunker::chunk_ranges(8, 8, 0);
        let outcomes = extract_chunks(
            Arc::new(SlowModel),
            grid,
            chunks,
            ExtractorConfig {
                chunk_timeout: Duration::from_millis(50),
                ..ExtractorConfig::default()
            },
            |_, _| {},
        )
        .await;

        let failure = outcomes[0].failure.as_ref().unwrap();
        assert_eq!(failure.0, ErrorKind::ExtractionTimeout);
    }

    #[tokio::test]
    async fn test_progress_reaches_total() {
        let grid = Arc::new(test_grid(30));
        let chunks = crate::domain::etl::chunker::chunk_ranges(30, 10, 2);
        let total = chunks.len();
        let mut seen = Vec::new();
        extract_chunks(Arc::new(EchoModel), grid, chunks, config(), |done, of| {
            assert_eq!(of, total);
            seen.push(done);
        })
        .await;
        assert_eq!(seen.last().copied(), Some(total));
    }
}
