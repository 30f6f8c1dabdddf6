//! PostgreSQL schema definitions
//!
//! Single-statement initial schema; the migration runner applies it on a
//! fresh database and versioned migrations afterwards. Requires the
//! `vector` extension for product embeddings.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Complete schema SQL for PostgreSQL
pub const SCHEMA: &str = r#"
CREATE EXTENSION IF NOT EXISTS vector;

-- =============================================================================
-- Infrastructure: Schema version tracking
-- =============================================================================
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    applied_at BIGINT NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at BIGINT NOT NULL,
    execution_time_ms INTEGER,
    success BOOLEAN NOT NULL DEFAULT TRUE
);

-- =============================================================================
-- 1. Suppliers (provisioned externally; read-only here)
-- =============================================================================
CREATE TABLE IF NOT EXISTS suppliers (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL CHECK(length(name) >= 1),
    source_location TEXT NOT NULL,
    source_kind TEXT NOT NULL CHECK(source_kind IN ('spreadsheet', 'csv', 'pdf', 'sheet_export')),
    semantic_etl_enabled BOOLEAN NOT NULL DEFAULT FALSE,
    matching_enabled BOOLEAN NOT NULL DEFAULT FALSE,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
);

-- =============================================================================
-- 2. Jobs (courier-owned state, mirrored from analyses by the poller)
-- =============================================================================
CREATE TABLE IF NOT EXISTS jobs (
    id UUID PRIMARY KEY,
    supplier_id UUID NOT NULL REFERENCES suppliers(id),
    phase TEXT NOT NULL CHECK(phase IN (
        'downloading', 'analyzing', 'extracting', 'normalizing', 'matching',
        'complete', 'completed_with_errors', 'failed')),
    progress INTEGER NOT NULL DEFAULT 0 CHECK(progress BETWEEN 0 AND 100),
    counters JSONB NOT NULL DEFAULT '{}',
    error_kind TEXT,
    source TEXT NOT NULL,
    file_path TEXT,
    file_kind TEXT CHECK(file_kind IS NULL OR file_kind IN ('spreadsheet', 'csv', 'pdf')),
    analysis_id UUID,
    retry_count INTEGER NOT NULL DEFAULT 0,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    completed_at BIGINT
);

CREATE INDEX IF NOT EXISTS idx_jobs_supplier ON jobs(supplier_id);
CREATE INDEX IF NOT EXISTS idx_jobs_phase_updated ON jobs(phase, updated_at);

-- =============================================================================
-- 3. Job queue (courier work items; claimed with SKIP LOCKED)
-- =============================================================================
CREATE TABLE IF NOT EXISTS job_queue (
    id BIGSERIAL PRIMARY KEY,
    job_id UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    supplier_id UUID NOT NULL,
    source TEXT NOT NULL,
    available_at BIGINT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_job_queue_available ON job_queue(available_at);

-- =============================================================================
-- 4. Analyses (intelligence-owned sub-jobs)
-- =============================================================================
CREATE TABLE IF NOT EXISTS analyses (
    id UUID PRIMARY KEY,
    job_id UUID NOT NULL,
    supplier_id UUID NOT NULL REFERENCES suppliers(id),
    file_path TEXT NOT NULL,
    file_kind TEXT NOT NULL CHECK(file_kind IN ('spreadsheet', 'csv', 'pdf')),
    phase TEXT NOT NULL CHECK(phase IN (
        'analyzing', 'extracting', 'normalizing', 'matching',
        'complete', 'completed_with_errors', 'failed')),
    progress INTEGER NOT NULL DEFAULT 0 CHECK(progress BETWEEN 0 AND 100),
    counters JSONB NOT NULL DEFAULT '{}',
    error_kind TEXT,
    result JSONB,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    completed_at BIGINT
);

CREATE INDEX IF NOT EXISTS idx_analyses_job ON analyses(job_id);

-- =============================================================================
-- 5. Categories (forest; supplier-scoped or global)
-- =============================================================================
CREATE TABLE IF NOT EXISTS categories (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL CHECK(length(name) >= 1),
    parent_id UUID REFERENCES categories(id),
    supplier_id UUID REFERENCES suppliers(id),
    needs_review BOOLEAN NOT NULL DEFAULT FALSE,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
);

-- Name unique per (parent, supplier scope); NULLs collapse to the nil uuid
-- so global roots cannot collide either.
CREATE UNIQUE INDEX IF NOT EXISTS idx_categories_name_scope ON categories(
    name,
    COALESCE(parent_id, '00000000-0000-0000-0000-000000000000'::uuid),
    COALESCE(supplier_id, '00000000-0000-0000-0000-000000000000'::uuid)
);

CREATE INDEX IF NOT EXISTS idx_categories_active ON categories(is_active, supplier_id);

-- =============================================================================
-- 6. Supplier items (persisted extraction output)
-- =============================================================================
CREATE TABLE IF NOT EXISTS supplier_items (
    id UUID PRIMARY KEY,
    supplier_id UUID NOT NULL REFERENCES suppliers(id),
    name TEXT NOT NULL CHECK(length(name) >= 1),
    description TEXT,
    wholesale_price NUMERIC(18, 4) CHECK(wholesale_price IS NULL OR wholesale_price >= 0),
    retail_price NUMERIC(18, 4) NOT NULL CHECK(retail_price >= 0),
    category_id UUID REFERENCES categories(id),
    fingerprint TEXT NOT NULL,
    canonical_product_id UUID,
    raw JSONB NOT NULL DEFAULT '{}',
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    UNIQUE (supplier_id, fingerprint)
);

CREATE INDEX IF NOT EXISTS idx_supplier_items_supplier ON supplier_items(supplier_id);
CREATE INDEX IF NOT EXISTS idx_supplier_items_category ON supplier_items(category_id);

-- =============================================================================
-- 7. Price history (append-only)
-- =============================================================================
CREATE TABLE IF NOT EXISTS price_history (
    id BIGSERIAL PRIMARY KEY,
    supplier_item_id UUID NOT NULL REFERENCES supplier_items(id) ON DELETE CASCADE,
    wholesale_price NUMERIC(18, 4),
    retail_price NUMERIC(18, 4) NOT NULL,
    captured_at BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_price_history_item ON price_history(supplier_item_id, captured_at);

-- =============================================================================
-- 8. Parsing logs (autocommit writes, never inside persist batches)
-- =============================================================================
CREATE TABLE IF NOT EXISTS parsing_logs (
    id BIGSERIAL PRIMARY KEY,
    analysis_id UUID NOT NULL,
    job_id UUID NOT NULL,
    chunk_id INTEGER,
    row_in_chunk INTEGER,
    error_kind TEXT NOT NULL,
    message TEXT NOT NULL,
    row_snapshot JSONB,
    created_at BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_parsing_logs_analysis ON parsing_logs(analysis_id, error_kind, id);

-- =============================================================================
-- 9. Category reviews (pending taxonomy decisions)
-- =============================================================================
CREATE TABLE IF NOT EXISTS category_reviews (
    id UUID PRIMARY KEY,
    job_id UUID NOT NULL,
    analysis_id UUID NOT NULL,
    proposed_path JSONB NOT NULL,
    best_match_category_id UUID REFERENCES categories(id),
    best_match_score INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending', 'approved', 'rejected', 'renamed')),
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_category_reviews_job ON category_reviews(job_id, status);

-- =============================================================================
-- 10. Canonical products + embeddings (matcher)
-- =============================================================================
CREATE TABLE IF NOT EXISTS canonical_products (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    category TEXT,
    created_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS product_embeddings (
    owner_id UUID NOT NULL,
    owner_kind TEXT NOT NULL CHECK(owner_kind IN ('supplier_item', 'canonical_product')),
    model TEXT NOT NULL,
    embedding vector(768) NOT NULL,
    created_at BIGINT NOT NULL,
    PRIMARY KEY (owner_id, owner_kind, model)
);

CREATE INDEX IF NOT EXISTS idx_product_embeddings_cosine
    ON product_embeddings USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100);

-- =============================================================================
-- 11. Match review queue
-- =============================================================================
CREATE TABLE IF NOT EXISTS match_review_queue (
    id UUID PRIMARY KEY,
    supplier_item_id UUID NOT NULL REFERENCES supplier_items(id) ON DELETE CASCADE,
    candidate_product_id UUID NOT NULL REFERENCES canonical_products(id),
    confidence DOUBLE PRECISION NOT NULL,
    reasoning TEXT,
    status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending', 'approved', 'rejected')),
    created_at BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_match_review_item ON match_review_queue(supplier_item_id, status);
"#;
