//! CLI `doctor` command — run database diagnostics and print a health report.

use anyhow::{Context, Result};

use mnema::config::MnemaConfig;
use mnema::db::migrations;

/// Run database diagnostics and print a health report.
pub fn run(config: &MnemaConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("It will be created on first ingest.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = mnema::db::open_database(&db_path, config.embedding.dim)
        .context("failed to open database (may be corrupt, or created with another dimensionality)")?;

    let schema_version = migrations::get_schema_version(&conn)?;
    let vec_version: String = conn.query_row("SELECT vec_version()", [], |r| r.get(0))?;
    let records: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?;
    let vectors: i64 = conn.query_row("SELECT COUNT(*) FROM vectors", [], |r| r.get(0))?;
    let facts: i64 = conn.query_row("SELECT COUNT(*) FROM temporal_facts", [], |r| r.get(0))?;

    // Every vector entry should agree with the configured dimensionality.
    let stale_dims: i64 = conn.query_row(
        "SELECT COUNT(*) FROM vectors WHERE dim != ?1",
        [config.embedding.dim as i64],
        |r| r.get(0),
    )?;

    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;

    println!("mnema Health Report");
    println!("===================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {schema_version}");
    println!("sqlite-vec:        v{vec_version}");
    println!("Dimensionality:    {}", config.embedding.dim);
    println!();
    println!("Row counts:");
    println!("  Records:         {records}");
    println!("  Vectors:         {vectors}");
    println!("  Facts:           {facts}");
    println!();

    if stale_dims > 0 {
        println!("WARNING: {stale_dims} vector entries carry a stale dimensionality.");
    }
    if integrity == "ok" {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({integrity})");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
