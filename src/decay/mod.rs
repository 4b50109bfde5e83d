//! Salience decay and reinforcement.
//!
//! Salience decays exponentially in the time since a record was last seen:
//! `salience(t) = salience0 * exp(-λ * Δt_days)`, clamped to a floor.
//! Reinforcement adds a bounded boost and refreshes `last_seen_at`. Decay is
//! persisted in batches by the maintenance task rather than recomputed lazily
//! on every read — periodic write amplification in exchange for read-time
//! simplicity.

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::config::DecayConfig;
use crate::error::{MemoryError, Result};

const MS_PER_DAY: f64 = 86_400_000.0;

/// Decayed salience after `elapsed_ms` under per-day constant `lambda`,
/// clamped to `floor`. Negative elapsed time (clock skew) decays nothing.
pub fn decayed_salience(salience: f64, lambda: f64, elapsed_ms: i64, floor: f64) -> f64 {
    if lambda <= 0.0 || elapsed_ms <= 0 {
        return salience.max(floor);
    }
    let days = elapsed_ms as f64 / MS_PER_DAY;
    (salience * (-lambda * days).exp()).max(floor)
}

/// Boost a record's salience and refresh its seen/updated timestamps in one
/// atomic UPDATE. The boost is clamped to `[0, max_boost]` and the result to
/// the configured ceiling. Returns the new salience.
pub fn reinforce(
    conn: &Connection,
    id: &str,
    boost: f64,
    config: &DecayConfig,
    now: i64,
) -> Result<f64> {
    let boost = boost.clamp(0.0, config.max_boost);
    let ceiling = config.ceiling();

    let rows = conn.execute(
        "UPDATE records SET salience = MIN(salience + ?1, ?2), \
         last_seen_at = ?3, updated_at = ?3 WHERE id = ?4",
        params![boost, ceiling, now, id],
    )?;
    if rows == 0 {
        return Err(MemoryError::NotFound(id.to_string()));
    }

    let salience: f64 = conn.query_row(
        "SELECT salience FROM records WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(salience)
}

/// Outcome of one decay batch run.
#[derive(Debug, Default, Serialize)]
pub struct DecayBatchResult {
    pub scanned: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Recompute and persist salience for every record, in batches of
/// `config.batch_size`. A failure on one record is logged and skipped so a
/// bad row never halts decay for the rest of the population.
///
/// Elapsed time is anchored at `max(last_seen_at, updated_at)` and each
/// applied decay stamps `updated_at`, so successive batches compose into the
/// exact `exp(-λ * Δt)` curve instead of double-counting already-decayed
/// intervals. `last_seen_at` is never touched: decay is not an access.
pub fn run_decay_batch(conn: &Connection, config: &DecayConfig, now: i64) -> Result<DecayBatchResult> {
    let mut result = DecayBatchResult::default();
    let mut cursor = i64::MAX;

    loop {
        let batch: Vec<(i64, String, f64, f64, i64)> = {
            let mut stmt = conn.prepare(
                "SELECT rowid, id, salience, decay_lambda, MAX(last_seen_at, updated_at) \
                 FROM records WHERE rowid < ?1 ORDER BY rowid DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![cursor, config.batch_size as i64], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        if batch.is_empty() {
            break;
        }

        for (rowid, id, salience, lambda, anchor) in &batch {
            cursor = *rowid;
            result.scanned += 1;

            let next = decayed_salience(*salience, *lambda, now - anchor, config.floor);
            if (next - salience).abs() < f64::EPSILON {
                continue;
            }

            match conn.execute(
                "UPDATE records SET salience = ?1, updated_at = ?2 WHERE id = ?3",
                params![next, now, id],
            ) {
                Ok(_) => result.updated += 1,
                Err(e) => {
                    tracing::warn!(record = %id, error = %e, "decay update failed, skipping");
                    result.skipped += 1;
                }
            }
        }
    }

    tracing::debug!(
        scanned = result.scanned,
        updated = result.updated,
        skipped = result.skipped,
        "decay batch complete"
    );
    Ok(result)
}
