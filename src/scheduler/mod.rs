//! Background maintenance scheduler.
//!
//! A [`Scheduler`] owns the full name → task-state mapping; there is no
//! process-wide singleton. Each registered task runs on its own timer with
//! three guards between a tick and an execution:
//!
//! 1. **Skip if still running** — a tick that fires while the previous run is
//!    still going is skipped, never queued, so a task has at most one live
//!    execution in this process.
//! 2. **Distributed lock** — the task name is locked in the shared store
//!    before running; losing the lock is a benign skip, giving at most one
//!    live execution across the whole deployment.
//! 3. **Timeout** — with `timeout` set, a run that exceeds the budget is
//!    cancelled (the future is dropped; cancellation is cooperative) and
//!    recorded as a failure with the error text `"Task timeout"`. The task
//!    stays schedulable on its next tick.
//!
//! Successful runs append a row to `maintenance_stats` for observability —
//! rows are only ever inserted, never updated.

pub mod lock;

pub use lock::{ContendedLock, MaintenanceLock, SqliteLock, StubLock};

use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::db::now_ms;
use crate::error::{MemoryError, Result};

/// Boxed task future. The `u64` payload is the run's "items processed"
/// count, recorded into `maintenance_stats`.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<u64>> + Send>>;

/// Task factory: called once per executed tick.
pub type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Per-task options.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Execution budget per run. `None` = unbounded.
    pub timeout: Option<Duration>,
}

/// Observable per-task counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskStats {
    pub total_runs: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub running: bool,
}

pub struct Scheduler {
    tasks: Arc<Mutex<HashMap<String, TaskStats>>>,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
    lock: Arc<dyn MaintenanceLock>,
    stats_sink: Option<Arc<Mutex<Connection>>>,
}

impl Scheduler {
    pub fn new(lock: Arc<dyn MaintenanceLock>) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            handles: Mutex::new(HashMap::new()),
            lock,
            stats_sink: None,
        }
    }

    /// Record successful runs into this store's `maintenance_stats` table.
    pub fn with_stats_sink(mut self, conn: Arc<Mutex<Connection>>) -> Self {
        self.stats_sink = Some(conn);
        self
    }

    /// Schedule `task` to fire every `period`. Re-registering a name replaces
    /// the previous schedule. The first tick fires one full period after
    /// registration.
    pub fn register_interval(
        &self,
        name: &str,
        period: Duration,
        opts: TaskOptions,
        task: TaskFn,
    ) {
        lock_map(&self.tasks).insert(name.to_string(), TaskStats::default());

        let tasks = Arc::clone(&self.tasks);
        let dist_lock = Arc::clone(&self.lock);
        let stats_sink = self.stats_sink.clone();
        let task_name = name.to_string();
        // Lock TTL outlives a well-behaved run: the timeout when set,
        // otherwise two periods.
        let ttl = opts.timeout.unwrap_or(period * 2).max(period);

        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                // Ticks landing mid-run are skipped by construction: this
                // loop is awaiting the callback, not the timer, and Skip
                // drops the backlog instead of replaying it.
                if !dist_lock.acquire(&task_name, ttl) {
                    tracing::trace!(task = %task_name, "lock unavailable, skipping tick");
                    continue;
                }

                if let Some(stats) = lock_map(&tasks).get_mut(&task_name) {
                    stats.running = true;
                }

                let outcome = match opts.timeout {
                    Some(budget) => match tokio::time::timeout(budget, task()).await {
                        Ok(result) => result,
                        Err(_) => Err(MemoryError::TaskTimeout),
                    },
                    None => task().await,
                };

                {
                    let mut map = lock_map(&tasks);
                    if let Some(stats) = map.get_mut(&task_name) {
                        stats.total_runs += 1;
                        stats.running = false;
                        match &outcome {
                            Ok(_) => stats.last_error = None,
                            Err(e) => {
                                stats.failures += 1;
                                stats.last_error = Some(e.to_string());
                            }
                        }
                    }
                }

                match outcome {
                    Ok(count) => {
                        if let Some(sink) = stats_sink.clone() {
                            let task_name = task_name.clone();
                            // rusqlite is blocking; keep it off the timer thread.
                            let _ = tokio::task::spawn_blocking(move || {
                                let conn = match sink.lock() {
                                    Ok(c) => c,
                                    Err(poisoned) => poisoned.into_inner(),
                                };
                                if let Err(e) = record_stat(&conn, &task_name, count, now_ms()) {
                                    tracing::warn!(task = %task_name, error = %e, "stat insert failed");
                                }
                            })
                            .await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(task = %task_name, error = %e, "maintenance run failed");
                    }
                }

                dist_lock.release(&task_name);
            }
        });

        if let Some(old) = lock_map(&self.handles).insert(name.to_string(), handle) {
            old.abort();
        }
        tracing::info!(task = %name, period_ms = period.as_millis() as u64, "maintenance task registered");
    }

    /// Per-task `{total_runs, failures, last_error, running}`.
    pub fn stats(&self) -> HashMap<String, TaskStats> {
        lock_map(&self.tasks).clone()
    }

    /// Cancel every registered interval and release any held locks. Running
    /// callbacks are dropped at their next await point.
    pub fn stop_all(&self) {
        let mut handles = lock_map(&self.handles);
        for (name, handle) in handles.drain() {
            handle.abort();
            self.lock.release(&name);
            if let Some(stats) = lock_map(&self.tasks).get_mut(&name) {
                stats.running = false;
            }
        }
        tracing::info!("maintenance stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn lock_map<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Append one observability row. Rows are inserted, never updated.
pub fn record_stat(conn: &Connection, task: &str, count: u64, now: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO maintenance_stats (task, count, created_at) VALUES (?1, ?2, ?3)",
        params![task, count as i64, now],
    )?;
    Ok(())
}

/// Most recent stat rows, newest first.
pub fn recent_stats(conn: &Connection, limit: usize) -> Result<Vec<(String, i64, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT task, count, created_at FROM maintenance_stats ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Delete stat rows older than `cutoff`. Used by the consolidate task so the
/// append-only table does not grow without bound. Returns rows removed.
pub fn trim_stats(conn: &Connection, cutoff: i64) -> Result<usize> {
    let rows = conn.execute(
        "DELETE FROM maintenance_stats WHERE created_at < ?1",
        params![cutoff],
    )?;
    Ok(rows)
}
