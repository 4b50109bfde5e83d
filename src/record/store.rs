//! Durable record storage — the leaf every other component references by id.
//!
//! All reads that can be tenant-scoped take an explicit `Option<&str>` tenant;
//! `None` sees only records with no tenant. Scoping is never inferred.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

use crate::error::{MemoryError, Result};
use crate::record::types::{MemoryRecord, RecordPatch, Sector};
use crate::record::{fingerprint_of, hamming};

/// One page of records plus the cursor for the next page, insertion-order
/// descending. `next_cursor` is `None` once the listing is exhausted.
#[derive(Debug)]
pub struct Page {
    pub records: Vec<MemoryRecord>,
    pub next_cursor: Option<i64>,
}

const RECORD_COLUMNS: &str = "id, tenant, sector, content, tags, metadata, fingerprint, \
     salience, decay_lambda, version, reflected, created_at, updated_at, last_seen_at";

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let sector_str: String = row.get(2)?;
    let tags_str: String = row.get(4)?;
    let metadata_str: Option<String> = row.get(5)?;
    let fingerprint: i64 = row.get(6)?;
    let reflected: i64 = row.get(10)?;
    Ok(MemoryRecord {
        id: row.get(0)?,
        tenant: row.get(1)?,
        sector: sector_str.parse().unwrap_or(Sector::Semantic),
        content: row.get(3)?,
        tags: serde_json::from_str(&tags_str).unwrap_or_default(),
        metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
        fingerprint: fingerprint as u64,
        salience: row.get(7)?,
        decay_lambda: row.get(8)?,
        version: row.get(9)?,
        reflected: reflected != 0,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        last_seen_at: row.get(13)?,
    })
}

/// Insert a new record. Fails with [`MemoryError::DuplicateId`] if the id
/// already exists.
pub fn insert(conn: &Connection, record: &MemoryRecord) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM records WHERE id = ?1",
        params![record.id],
        |row| row.get(0),
    )?;
    if exists {
        return Err(MemoryError::DuplicateId(record.id.clone()));
    }

    let tags_json = serde_json::to_string(&record.tags)?;
    let metadata_json = record
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO records (id, tenant, sector, content, tags, metadata, fingerprint, \
         salience, decay_lambda, version, reflected, created_at, updated_at, last_seen_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            record.id,
            record.tenant,
            record.sector.as_str(),
            record.content,
            tags_json,
            metadata_json,
            record.fingerprint as i64,
            record.salience,
            record.decay_lambda,
            record.version,
            record.reflected as i64,
            record.created_at,
            record.updated_at,
            record.last_seen_at,
        ],
    )?;
    Ok(())
}

/// Fetch a single record by id.
pub fn get(conn: &Connection, id: &str) -> Result<Option<MemoryRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"),
            params![id],
            row_to_record,
        )
        .optional()?;
    Ok(record)
}

/// Batch-fetch records by id. Missing ids are silently absent from the map —
/// a partial miss is not an error.
pub fn get_by_ids(conn: &Connection, ids: &[&str]) -> Result<HashMap<String, MemoryRecord>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM records WHERE id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let bind: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

    let rows = stmt
        .query_map(bind.as_slice(), row_to_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut map = HashMap::new();
    for row in rows {
        map.insert(row.id.clone(), row);
    }
    Ok(map)
}

/// Apply a partial edit. Bumps `version` and `updated_at`; a content change
/// also recomputes the fingerprint. Fails with [`MemoryError::NotFound`] if
/// the id is absent.
pub fn update(conn: &Connection, id: &str, patch: &RecordPatch, now: i64) -> Result<MemoryRecord> {
    let mut record = get(conn, id)?.ok_or_else(|| MemoryError::NotFound(id.to_string()))?;

    if patch.is_empty() {
        return Ok(record);
    }

    if let Some(ref content) = patch.content {
        record.content = content.clone();
        record.fingerprint = fingerprint_of(content);
    }
    if let Some(ref tags) = patch.tags {
        record.tags = tags.clone();
    }
    if let Some(ref metadata) = patch.metadata {
        record.metadata = Some(metadata.clone());
    }
    record.version += 1;
    record.updated_at = now;

    let tags_json = serde_json::to_string(&record.tags)?;
    let metadata_json = record
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "UPDATE records SET content = ?1, tags = ?2, metadata = ?3, fingerprint = ?4, \
         version = ?5, updated_at = ?6 WHERE id = ?7",
        params![
            record.content,
            tags_json,
            metadata_json,
            record.fingerprint as i64,
            record.version,
            now,
            id,
        ],
    )?;
    Ok(record)
}

/// Refresh `last_seen_at` and salience without a version bump — a read, not
/// an edit. Fails with [`MemoryError::NotFound`] if the id is absent.
pub fn touch(conn: &Connection, id: &str, new_salience: f64, now: i64) -> Result<()> {
    let rows = conn.execute(
        "UPDATE records SET salience = ?1, last_seen_at = ?2 WHERE id = ?3",
        params![new_salience, now, id],
    )?;
    if rows == 0 {
        return Err(MemoryError::NotFound(id.to_string()));
    }
    Ok(())
}

/// Delete a record. Vector entries die with it via FK cascade; waypoints are
/// the caller's concern (the engine unlinks them in the same transaction).
/// Temporal facts are independent entities and are not touched.
pub fn delete(conn: &Connection, id: &str) -> Result<()> {
    let rows = conn.execute("DELETE FROM records WHERE id = ?1", params![id])?;
    if rows == 0 {
        return Err(MemoryError::NotFound(id.to_string()));
    }
    Ok(())
}

/// Page through a sector's records, insertion-order descending.
pub fn list_by_sector(
    conn: &Connection,
    sector: Sector,
    tenant: Option<&str>,
    cursor: Option<i64>,
    limit: usize,
) -> Result<Page> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS}, rowid FROM records \
         WHERE sector = ?1 AND tenant IS ?2 AND rowid < ?3 \
         ORDER BY rowid DESC LIMIT ?4"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![sector.as_str(), tenant, cursor.unwrap_or(i64::MAX), limit as i64],
            |row| Ok((row_to_record(row)?, row.get::<_, i64>(14)?)),
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(page_from(rows, limit))
}

/// Page through a tenant's records, insertion-order descending.
pub fn list_by_tenant(
    conn: &Connection,
    tenant: Option<&str>,
    cursor: Option<i64>,
    limit: usize,
) -> Result<Page> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS}, rowid FROM records \
         WHERE tenant IS ?1 AND rowid < ?2 ORDER BY rowid DESC LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![tenant, cursor.unwrap_or(i64::MAX), limit as i64],
            |row| Ok((row_to_record(row)?, row.get::<_, i64>(14)?)),
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(page_from(rows, limit))
}

fn page_from(rows: Vec<(MemoryRecord, i64)>, limit: usize) -> Page {
    let last_rowid = rows.last().map(|(_, rowid)| *rowid);
    let full = rows.len() == limit;
    Page {
        records: rows.into_iter().map(|(r, _)| r).collect(),
        next_cursor: if full { last_rowid } else { None },
    }
}

/// Find an existing same-sector, same-tenant record whose fingerprint is
/// within `max_hamming` bits of `fingerprint`. Scans most recent first,
/// bounded, so the gate stays cheap on large stores.
pub fn find_near_duplicate(
    conn: &Connection,
    sector: Sector,
    tenant: Option<&str>,
    fingerprint: u64,
    max_hamming: u32,
) -> Result<Option<String>> {
    let mut stmt = conn.prepare(
        "SELECT id, fingerprint FROM records \
         WHERE sector = ?1 AND tenant IS ?2 ORDER BY rowid DESC LIMIT 256",
    )?;
    let candidates = stmt
        .query_map(params![sector.as_str(), tenant], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (id, candidate) in candidates {
        if hamming(fingerprint, candidate) <= max_hamming {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

/// Move a record to a new sector (the reclassify path). Bumps version; the
/// caller re-indexes vectors in the same transaction.
pub fn set_sector(
    conn: &Connection,
    id: &str,
    sector: Sector,
    decay_lambda: f64,
    now: i64,
) -> Result<()> {
    let rows = conn.execute(
        "UPDATE records SET sector = ?1, decay_lambda = ?2, version = version + 1, \
         updated_at = ?3 WHERE id = ?4",
        params![sector.as_str(), decay_lambda, now, id],
    )?;
    if rows == 0 {
        return Err(MemoryError::NotFound(id.to_string()));
    }
    Ok(())
}

/// Cache the record's primary embedding alongside the row. The vectors table
/// stays authoritative; this copy saves a join on hot read paths.
pub fn set_mean_vector(conn: &Connection, id: &str, blob: &[u8]) -> Result<()> {
    conn.execute(
        "UPDATE records SET mean_vector = ?1 WHERE id = ?2",
        params![blob, id],
    )?;
    Ok(())
}

/// Per-tenant counts of records the reflection task has not yet considered.
pub fn unreflected_counts(conn: &Connection) -> Result<Vec<(Option<String>, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT tenant, COUNT(*) FROM records WHERE reflected = 0 GROUP BY tenant",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Mark all of a tenant's records reflected. Returns the number affected.
pub fn mark_reflected(conn: &Connection, tenant: Option<&str>) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE records SET reflected = 1 WHERE tenant IS ?1 AND reflected = 0",
        params![tenant],
    )?;
    Ok(rows)
}
