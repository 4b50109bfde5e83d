//! SQL DDL for all mnema tables.
//!
//! Defines the `records`, `vectors`, `waypoints`, `temporal_facts`,
//! `temporal_edges`, `maintenance_stats`, `maintenance_locks`, and
//! `schema_meta` tables, plus one `vec0` virtual table per sector for the
//! accelerated vector index. All DDL uses `IF NOT EXISTS` for idempotent
//! initialization.

use rusqlite::Connection;

use crate::error::{MemoryError, Result};
use crate::record::types::Sector;

/// All schema DDL statements for mnema's core tables.
const SCHEMA_SQL: &str = r#"
-- Core record storage
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    tenant TEXT,
    sector TEXT NOT NULL CHECK(sector IN ('episodic','semantic','procedural','emotional','reflective')),
    content TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    metadata TEXT,
    fingerprint INTEGER NOT NULL DEFAULT 0,
    salience REAL NOT NULL DEFAULT 1.0 CHECK(salience >= 0.0),
    decay_lambda REAL NOT NULL CHECK(decay_lambda >= 0.0),
    version INTEGER NOT NULL DEFAULT 1,
    reflected INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    last_seen_at INTEGER NOT NULL,
    mean_vector BLOB
);

CREATE INDEX IF NOT EXISTS idx_records_sector ON records(sector);
CREATE INDEX IF NOT EXISTS idx_records_tenant ON records(tenant);
CREATE INDEX IF NOT EXISTS idx_records_salience ON records(salience);
CREATE INDEX IF NOT EXISTS idx_records_fingerprint ON records(fingerprint);

-- Packed embedding vectors, one entry per (record, sector)
CREATE TABLE IF NOT EXISTS vectors (
    record_id TEXT NOT NULL REFERENCES records(id) ON DELETE CASCADE,
    sector TEXT NOT NULL,
    dim INTEGER NOT NULL,
    embedding BLOB NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (record_id, sector)
);

-- Associative waypoint graph: latest successor per (source, tenant)
CREATE TABLE IF NOT EXISTS waypoints (
    source_id TEXT NOT NULL,
    tenant TEXT,
    dest_id TEXT NOT NULL,
    weight REAL NOT NULL CHECK(weight >= 0.0 AND weight <= 1.0),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_waypoints_src_tenant
    ON waypoints(source_id, ifnull(tenant, ''));
CREATE INDEX IF NOT EXISTS idx_waypoints_dest ON waypoints(dest_id);

-- Bitemporal facts (append-only history; invalidation sets valid_to)
CREATE TABLE IF NOT EXISTS temporal_facts (
    id TEXT PRIMARY KEY,
    subject TEXT NOT NULL,
    predicate TEXT NOT NULL,
    object TEXT NOT NULL,
    valid_from INTEGER NOT NULL,
    valid_to INTEGER,
    confidence REAL NOT NULL DEFAULT 1.0 CHECK(confidence >= 0.0 AND confidence <= 1.0),
    last_updated INTEGER NOT NULL,
    metadata TEXT,
    UNIQUE(subject, predicate, object, valid_from)
);

CREATE INDEX IF NOT EXISTS idx_facts_subject ON temporal_facts(subject);
CREATE INDEX IF NOT EXISTS idx_facts_predicate ON temporal_facts(predicate);

-- Typed edges between facts; invalidated with their facts, never dangling
CREATE TABLE IF NOT EXISTS temporal_edges (
    id TEXT PRIMARY KEY,
    source_fact_id TEXT NOT NULL REFERENCES temporal_facts(id),
    target_fact_id TEXT NOT NULL REFERENCES temporal_facts(id),
    relation TEXT NOT NULL,
    valid_from INTEGER NOT NULL,
    valid_to INTEGER,
    weight REAL NOT NULL DEFAULT 1.0,
    metadata TEXT,
    UNIQUE(source_fact_id, target_fact_id, relation)
);

CREATE INDEX IF NOT EXISTS idx_edges_source ON temporal_edges(source_fact_id);

-- Append-only scheduler observability counters
CREATE TABLE IF NOT EXISTS maintenance_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task TEXT NOT NULL,
    count INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

-- Distributed maintenance lock, one row per task name
CREATE TABLE IF NOT EXISTS maintenance_locks (
    name TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables for the given embedding dimensionality.
/// Idempotent (uses IF NOT EXISTS); fails with [`MemoryError::DimensionMismatch`]
/// when the database was created with a different dimensionality.
pub fn init_schema(conn: &Connection, dim: usize) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // vec0 virtual tables must be created separately (sqlite-vec syntax);
    // one per sector so KNN stays sector-partitioned.
    for sector in Sector::ALL {
        let ddl = format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING vec0(id TEXT PRIMARY KEY, embedding FLOAT[{}])",
            vec_table(sector),
            dim,
        );
        conn.execute_batch(&ddl)?;
    }

    // Set initial schema version and dimensionality if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('embedding_dim', ?1)",
        [dim.to_string()],
    )?;

    // A database created under another dimensionality is never silently coerced.
    let stored: String = conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'embedding_dim'",
        [],
        |row| row.get(0),
    )?;
    let stored_dim = stored.parse::<usize>().unwrap_or(0);
    if stored_dim != dim {
        return Err(MemoryError::DimensionMismatch {
            expected: stored_dim,
            actual: dim,
        });
    }

    Ok(())
}

/// Name of the per-sector vec0 virtual table.
pub fn vec_table(sector: Sector) -> String {
    format!("vec_{}", sector.as_str())
}
