//! Distributed maintenance lock.
//!
//! Multiple process instances may share one store; a task must run on at
//! most one of them at a time. [`SqliteLock`] keys a TTL row per task name in
//! the shared database, so whichever instance wins the row runs the task and
//! the rest skip. Contention and storage errors are both treated as
//! "not acquired" — a benign skip, never a surfaced failure.

use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::db::now_ms;

pub trait MaintenanceLock: Send + Sync {
    /// Try to take the named lock for `ttl`. `false` means another holder
    /// has it (or the attempt failed) — the caller skips this run.
    fn acquire(&self, name: &str, ttl: Duration) -> bool;

    /// Release the named lock if this instance holds it.
    fn release(&self, name: &str);
}

/// Store-backed lock: one row per task name with owner and expiry. Expired
/// rows are stealable, so a crashed holder cannot wedge maintenance forever.
pub struct SqliteLock {
    conn: Arc<Mutex<Connection>>,
    owner: String,
}

impl SqliteLock {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            owner: uuid::Uuid::now_v7().to_string(),
        }
    }
}

impl MaintenanceLock for SqliteLock {
    fn acquire(&self, name: &str, ttl: Duration) -> bool {
        let now = now_ms();
        let expires_at = now + ttl.as_millis() as i64;

        let conn = match self.conn.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = conn.execute(
            "INSERT INTO maintenance_locks (name, owner, expires_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(name) DO UPDATE SET owner = excluded.owner, expires_at = excluded.expires_at \
             WHERE maintenance_locks.expires_at < ?4 OR maintenance_locks.owner = excluded.owner",
            params![name, self.owner, expires_at, now],
        );

        match result {
            Ok(rows) => rows > 0,
            Err(e) => {
                tracing::warn!(task = %name, error = %e, "lock acquire failed, skipping run");
                false
            }
        }
    }

    fn release(&self, name: &str) {
        let conn = match self.conn.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = conn.execute(
            "DELETE FROM maintenance_locks WHERE name = ?1 AND owner = ?2",
            params![name, self.owner],
        ) {
            tracing::warn!(task = %name, error = %e, "lock release failed");
        }
    }
}

/// Always-succeeding stub for tests and single-instance tooling.
pub struct StubLock;

impl MaintenanceLock for StubLock {
    fn acquire(&self, _name: &str, _ttl: Duration) -> bool {
        true
    }

    fn release(&self, _name: &str) {}
}

/// Never-succeeding stub, for exercising the contention path in tests.
pub struct ContendedLock;

impl MaintenanceLock for ContendedLock {
    fn acquire(&self, _name: &str, _ttl: Duration) -> bool {
        false
    }

    fn release(&self, _name: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn shared_db() -> Arc<Mutex<Connection>> {
        Arc::new(Mutex::new(db::open_memory_database(8).unwrap()))
    }

    #[test]
    fn lock_is_exclusive_between_owners() {
        let conn = shared_db();
        let a = SqliteLock::new(Arc::clone(&conn));
        let b = SqliteLock::new(Arc::clone(&conn));

        assert!(a.acquire("decay", Duration::from_secs(60)));
        assert!(!b.acquire("decay", Duration::from_secs(60)));

        // Independent task names do not contend
        assert!(b.acquire("reflect", Duration::from_secs(60)));
    }

    #[test]
    fn lock_is_reentrant_for_its_owner() {
        let conn = shared_db();
        let a = SqliteLock::new(conn);
        assert!(a.acquire("decay", Duration::from_secs(60)));
        assert!(a.acquire("decay", Duration::from_secs(60)));
    }

    #[test]
    fn release_frees_the_lock() {
        let conn = shared_db();
        let a = SqliteLock::new(Arc::clone(&conn));
        let b = SqliteLock::new(Arc::clone(&conn));

        assert!(a.acquire("decay", Duration::from_secs(60)));
        a.release("decay");
        assert!(b.acquire("decay", Duration::from_secs(60)));
    }

    #[test]
    fn release_is_owner_checked() {
        let conn = shared_db();
        let a = SqliteLock::new(Arc::clone(&conn));
        let b = SqliteLock::new(Arc::clone(&conn));

        assert!(a.acquire("decay", Duration::from_secs(60)));
        b.release("decay"); // not the holder; must be a no-op
        assert!(!b.acquire("decay", Duration::from_secs(60)));
    }

    #[test]
    fn expired_lock_is_stealable() {
        let conn = shared_db();
        let a = SqliteLock::new(Arc::clone(&conn));
        let b = SqliteLock::new(Arc::clone(&conn));

        // TTL of zero expires immediately
        assert!(a.acquire("decay", Duration::from_millis(0)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(b.acquire("decay", Duration::from_secs(60)));
    }
}
