pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) the mnema database at the given path, with all extensions
/// loaded and schema initialized for the configured embedding dimensionality.
pub fn open_database(path: impl AsRef<Path>, dim: usize) -> Result<Connection> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    load_sqlite_vec();

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    // Enable WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")?;
    // Enable foreign keys
    conn.pragma_update(None, "foreign_keys", "ON")?;

    schema::init_schema(&conn, dim).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;

    tracing::info!(path = %path.display(), dim, "database initialized");
    Ok(conn)
}

/// Open an in-memory database with schema applied. Used by tests and by the
/// engine's in-memory constructor.
pub fn open_memory_database(dim: usize) -> Result<Connection> {
    load_sqlite_vec();
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn, dim).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;
    Ok(conn)
}

/// Run `f` inside a transaction, collapsing nested calls into the outermost
/// scope.
///
/// If the connection is already inside an explicit transaction, `f` joins it:
/// no savepoint is created and an inner error surfaces to the outer scope
/// without issuing its own rollback. Only the outermost call commits or rolls
/// back. Callers must not rely on an inner scope unwinding independently.
pub fn with_tx<T>(
    conn: &mut Connection,
    f: impl FnOnce(&Connection) -> crate::error::Result<T>,
) -> crate::error::Result<T> {
    if !conn.is_autocommit() {
        // Already inside an outer transaction — collapse into it.
        return f(conn);
    }
    let tx = conn.transaction()?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}

/// Current wall-clock time as integer epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    #[test]
    fn with_tx_commits_outermost() {
        let mut conn = open_memory_database(8).unwrap();
        with_tx(&mut conn, |tx| {
            tx.execute(
                "INSERT INTO maintenance_stats (task, count, created_at) VALUES ('t', 1, 0)",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM maintenance_stats", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn with_tx_rolls_back_on_error() {
        let mut conn = open_memory_database(8).unwrap();
        let result: crate::error::Result<()> = with_tx(&mut conn, |tx| {
            tx.execute(
                "INSERT INTO maintenance_stats (task, count, created_at) VALUES ('t', 1, 0)",
                [],
            )?;
            Err(crate::error::MemoryError::Other("boom".into()))
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM maintenance_stats", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn nested_tx_collapses_to_outer_scope() {
        let mut conn = open_memory_database(8).unwrap();

        // Simulate a component opening its own scope while an outer
        // transaction is active: the inner write must land in the outer
        // transaction, and the outer rollback must discard it.
        let tx = conn.transaction().unwrap();
        {
            // The inner helper sees is_autocommit() == false and joins.
            assert!(!tx.is_autocommit());
            tx.execute(
                "INSERT INTO maintenance_stats (task, count, created_at) VALUES ('inner', 1, ?1)",
                params![0i64],
            )
            .unwrap();
        }
        tx.rollback().unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM maintenance_stats", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
