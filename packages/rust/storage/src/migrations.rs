//! SQL migration definitions for the sourcing database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as one batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: entities, stage_runs, provenance",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Discovered businesses
CREATE TABLE IF NOT EXISTS entities (
    key                  TEXT PRIMARY KEY,
    name                 TEXT NOT NULL,
    website              TEXT,
    phone                TEXT,
    address              TEXT,
    city                 TEXT,
    state                TEXT,
    zip                  TEXT,
    country              TEXT,
    directory_rating     REAL,
    directory_reviews    INTEGER,
    owner_tag            TEXT,

    description          TEXT,
    linkedin_company_url TEXT,
    owner_linkedin_url   TEXT,
    facebook_url         TEXT,
    instagram_url        TEXT,
    twitter_url          TEXT,
    youtube_url          TEXT,
    is_ecommerce         INTEGER,
    tech_stack_json      TEXT,
    industry_tag         TEXT,
    legal_name           TEXT,
    naics_code           TEXT,
    naics_description    TEXT,
    customer_type        TEXT,
    revenue_model        TEXT,
    is_family_owned      INTEGER,
    is_franchise         INTEGER,
    owner_name           TEXT,
    owner_source         TEXT,
    contact_email        TEXT,
    employee_count       INTEGER,
    revenue_estimate     INTEGER,
    risk_signal_json     TEXT,

    status               TEXT NOT NULL DEFAULT 'unprocessed'
                         CHECK (status IN ('unprocessed', 'partial', 'complete')),
    score                INTEGER CHECK (score IS NULL OR (score BETWEEN 0 AND 100)),
    score_breakdown_json TEXT,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL,
    last_enriched_at     TEXT
);

CREATE INDEX IF NOT EXISTS idx_entities_status ON entities(status);
CREATE INDEX IF NOT EXISTS idx_entities_score ON entities(score);

-- Per-stage ledger driving resumption
CREATE TABLE IF NOT EXISTS stage_runs (
    entity_key      TEXT NOT NULL REFERENCES entities(key) ON DELETE CASCADE,
    stage           TEXT NOT NULL,
    state           TEXT NOT NULL CHECK (state IN ('succeeded', 'failed')),
    attempts        INTEGER NOT NULL DEFAULT 0,
    last_error      TEXT,
    retryable       INTEGER NOT NULL DEFAULT 0,
    last_attempt_at TEXT NOT NULL,
    PRIMARY KEY (entity_key, stage)
);

-- Which stage wrote each field
CREATE TABLE IF NOT EXISTS provenance (
    entity_key  TEXT NOT NULL REFERENCES entities(key) ON DELETE CASCADE,
    field       TEXT NOT NULL,
    stage       TEXT NOT NULL,
    confidence  REAL CHECK (confidence IS NULL OR (confidence BETWEEN 0 AND 1)),
    evidence    TEXT,
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (entity_key, field)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Index for batch selection order",
            sql: r#"
CREATE INDEX IF NOT EXISTS idx_entities_status_created ON entities(status, created_at);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
