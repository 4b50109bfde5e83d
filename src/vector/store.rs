//! Per-sector vector storage with strategy-based similarity search.
//!
//! One entry per (record id, sector) — upsert semantics. Search ranks by
//! exact cosine similarity, descending, ties broken by most-recently-seen
//! record. When the accelerated index is active it supplies a KNN candidate
//! set that is re-scored exactly, so the two strategies agree on ranking;
//! if the candidate set comes up short after tenant filtering, the store
//! falls back to the full scan.

use rusqlite::{params, Connection};

use crate::error::{MemoryError, Result};
use crate::record::types::Sector;
use crate::vector::index::{AcceleratedIndex, ExactScanIndex, VectorIndex};
use crate::vector::{cosine_similarity, decode_vector, encode_vector};

/// A scored search hit.
pub type Scored = (String, f32);

pub struct VectorStore {
    dim: usize,
    global_scan_limit: usize,
    index: Box<dyn VectorIndex>,
}

struct CandidateRow {
    id: String,
    vector: Vec<f32>,
    last_seen_at: i64,
}

impl VectorStore {
    /// Construct with the strategy fixed for the store's lifetime.
    pub fn new(dim: usize, global_scan_limit: usize, accelerated: bool) -> Self {
        let index: Box<dyn VectorIndex> = if accelerated {
            Box::new(AcceleratedIndex)
        } else {
            Box::new(ExactScanIndex)
        };
        tracing::debug!(dim, strategy = index.name(), "vector store ready");
        Self {
            dim,
            global_scan_limit,
            index,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Write or overwrite the entry for (id, sector). Rejects vectors whose
    /// dimensionality disagrees with the configured sector dimensionality —
    /// no truncation, no padding.
    pub fn upsert(
        &self,
        conn: &Connection,
        id: &str,
        sector: Sector,
        vector: &[f32],
        now: i64,
    ) -> Result<()> {
        if vector.len() != self.dim {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }

        conn.execute(
            "INSERT INTO vectors (record_id, sector, dim, embedding, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(record_id, sector) DO UPDATE SET \
             dim = excluded.dim, embedding = excluded.embedding, updated_at = excluded.updated_at",
            params![id, sector.as_str(), self.dim as i64, encode_vector(vector), now],
        )?;
        self.index.upsert(conn, sector, id, vector)?;
        Ok(())
    }

    /// Drop all vector entries for a record (record deletion path).
    pub fn remove(&self, conn: &Connection, id: &str) -> Result<()> {
        conn.execute("DELETE FROM vectors WHERE record_id = ?1", params![id])?;
        self.index.remove(conn, id)?;
        Ok(())
    }

    /// Move a record's entries to a new sector (reclassify path).
    pub fn reindex_sector(
        &self,
        conn: &Connection,
        id: &str,
        from: Sector,
        to: Sector,
        now: i64,
    ) -> Result<()> {
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM vectors WHERE record_id = ?1 AND sector = ?2",
                params![id, from.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(blob) = blob else {
            return Ok(());
        };
        let vector = decode_vector(&blob)?;
        conn.execute(
            "DELETE FROM vectors WHERE record_id = ?1 AND sector = ?2",
            params![id, from.as_str()],
        )?;
        self.index.remove(conn, id)?;
        self.upsert(conn, id, to, &vector, now)
    }

    /// Exact top-k cosine search within one sector, tenant-scoped.
    pub fn search_similar(
        &self,
        conn: &Connection,
        sector: Sector,
        query: &[f32],
        top_k: usize,
        tenant: Option<&str>,
    ) -> Result<Vec<Scored>> {
        if query.len() != self.dim {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        // Oversample the candidate set: tenant filtering happens after KNN.
        let oversample = top_k * 4 + 16;
        if let Some(candidate_ids) =
            self.index.candidates(conn, sector, query, oversample)?
        {
            let rows =
                self.fetch_sector_rows(conn, sector, tenant, Some(candidate_ids.as_slice()))?;
            if rows.len() >= top_k {
                return Ok(rank(query, rows, top_k));
            }
            // Candidate set too thin after filtering — degrade to the scan.
        }

        let rows = self.fetch_sector_rows(conn, sector, tenant, None)?;
        Ok(rank(query, rows, top_k))
    }

    /// Cross-sector search over the global index. Bounded to the first
    /// `global_scan_limit` rows in scope — a documented approximation that
    /// keeps ungoverned tenants from triggering unbounded scans.
    pub fn search(
        &self,
        conn: &Connection,
        query: &[f32],
        top_k: usize,
        tenant: Option<&str>,
    ) -> Result<Vec<Scored>> {
        if query.len() != self.dim {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }

        let mut stmt = conn.prepare(
            "SELECT v.record_id, v.dim, v.embedding, r.last_seen_at \
             FROM vectors v JOIN records r ON r.id = v.record_id \
             WHERE r.tenant IS ?1 LIMIT ?2",
        )?;
        let rows = self.collect_rows(
            stmt.query(params![tenant, self.global_scan_limit as i64])?,
        )?;

        // A record can carry entries in several sectors; keep its best score.
        let mut best: std::collections::HashMap<String, (f32, i64)> =
            std::collections::HashMap::new();
        for row in rows {
            let score = cosine_similarity(query, &row.vector);
            let entry = best.entry(row.id).or_insert((score, row.last_seen_at));
            if score > entry.0 {
                entry.0 = score;
            }
        }

        let mut scored: Vec<(String, f32, i64)> = best
            .into_iter()
            .map(|(id, (score, seen))| (id, score, seen))
            .collect();
        sort_ranked(&mut scored);
        scored.truncate(top_k);
        Ok(scored.into_iter().map(|(id, score, _)| (id, score)).collect())
    }

    fn fetch_sector_rows(
        &self,
        conn: &Connection,
        sector: Sector,
        tenant: Option<&str>,
        candidate_ids: Option<&[String]>,
    ) -> Result<Vec<CandidateRow>> {
        match candidate_ids {
            None => {
                let mut stmt = conn.prepare(
                    "SELECT v.record_id, v.dim, v.embedding, r.last_seen_at \
                     FROM vectors v JOIN records r ON r.id = v.record_id \
                     WHERE v.sector = ?1 AND r.tenant IS ?2",
                )?;
                let out = self.collect_rows(stmt.query(params![sector.as_str(), tenant])?)?;
                Ok(out)
            }
            Some(ids) => {
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                let placeholders: Vec<String> =
                    (3..3 + ids.len()).map(|i| format!("?{i}")).collect();
                let sql = format!(
                    "SELECT v.record_id, v.dim, v.embedding, r.last_seen_at \
                     FROM vectors v JOIN records r ON r.id = v.record_id \
                     WHERE v.sector = ?1 AND r.tenant IS ?2 AND v.record_id IN ({})",
                    placeholders.join(", ")
                );
                let mut stmt = conn.prepare(&sql)?;
                let sector_name = sector.as_str();
                let mut bind: Vec<&dyn rusqlite::types::ToSql> = vec![&sector_name, &tenant];
                for id in ids {
                    bind.push(id);
                }
                let out = self.collect_rows(stmt.query(bind.as_slice())?)?;
                Ok(out)
            }
        }
    }

    fn collect_rows(&self, mut rows: rusqlite::Rows<'_>) -> Result<Vec<CandidateRow>> {
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let dim: i64 = row.get(1)?;
            let blob: Vec<u8> = row.get(2)?;
            let last_seen_at: i64 = row.get(3)?;

            // Dimensionality is checked on every read.
            if dim as usize != self.dim {
                return Err(MemoryError::DimensionMismatch {
                    expected: self.dim,
                    actual: dim as usize,
                });
            }
            let vector = decode_vector(&blob)?;
            if vector.len() != self.dim {
                return Err(MemoryError::DimensionMismatch {
                    expected: self.dim,
                    actual: vector.len(),
                });
            }
            out.push(CandidateRow {
                id,
                vector,
                last_seen_at,
            });
        }
        Ok(out)
    }
}

fn rank(query: &[f32], rows: Vec<CandidateRow>, top_k: usize) -> Vec<Scored> {
    let mut scored: Vec<(String, f32, i64)> = rows
        .into_iter()
        .map(|row| {
            let score = cosine_similarity(query, &row.vector);
            (row.id, score, row.last_seen_at)
        })
        .collect();
    sort_ranked(&mut scored);
    scored.truncate(top_k);
    scored.into_iter().map(|(id, score, _)| (id, score)).collect()
}

/// Cosine descending; ties broken by most-recently-seen record.
fn sort_ranked(scored: &mut [(String, f32, i64)]) {
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.2.cmp(&a.2))
    });
}

use rusqlite::OptionalExtension;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::record::store as records;
    use crate::record::types::MemoryRecord;

    const DIM: usize = 8;

    fn test_store(accelerated: bool) -> (Connection, VectorStore) {
        let conn = db::open_memory_database(DIM).unwrap();
        (conn, VectorStore::new(DIM, 5000, accelerated))
    }

    fn spike(at: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        v[at] = 1.0;
        v
    }

    fn insert_record(conn: &Connection, id: &str, tenant: Option<&str>, last_seen: i64) {
        records::insert(
            conn,
            &MemoryRecord {
                id: id.to_string(),
                tenant: tenant.map(String::from),
                sector: Sector::Semantic,
                content: format!("record {id}"),
                tags: vec![],
                metadata: None,
                fingerprint: 0,
                salience: 1.0,
                decay_lambda: 0.01,
                version: 1,
                reflected: false,
                created_at: last_seen,
                updated_at: last_seen,
                last_seen_at: last_seen,
            },
        )
        .unwrap();
    }

    #[test]
    fn upsert_rejects_wrong_dimensionality() {
        let (conn, store) = test_store(false);
        insert_record(&conn, "a", None, 0);
        let err = store
            .upsert(&conn, "a", Sector::Semantic, &[1.0, 2.0], 0)
            .unwrap_err();
        assert!(matches!(
            err,
            MemoryError::DimensionMismatch {
                expected: DIM,
                actual: 2
            }
        ));
    }

    #[test]
    fn upsert_overwrites_existing_entry() {
        let (conn, store) = test_store(false);
        insert_record(&conn, "a", None, 0);
        store.upsert(&conn, "a", Sector::Semantic, &spike(0), 0).unwrap();
        store.upsert(&conn, "a", Sector::Semantic, &spike(1), 1).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM vectors WHERE record_id = 'a' AND sector = 'semantic'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);

        let hits = store
            .search_similar(&conn, Sector::Semantic, &spike(1), 1, None)
            .unwrap();
        assert_eq!(hits[0].0, "a");
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn search_ranks_by_cosine_descending() {
        for accelerated in [false, true] {
            let (conn, store) = test_store(accelerated);
            insert_record(&conn, "near", None, 0);
            insert_record(&conn, "mid", None, 0);
            insert_record(&conn, "far", None, 0);

            store.upsert(&conn, "near", Sector::Semantic, &spike(0), 0).unwrap();
            let mut mid = spike(0);
            mid[1] = 1.0; // 45° off the query
            store.upsert(&conn, "mid", Sector::Semantic, &mid, 0).unwrap();
            store.upsert(&conn, "far", Sector::Semantic, &spike(2), 0).unwrap();

            let hits = store
                .search_similar(&conn, Sector::Semantic, &spike(0), 3, None)
                .unwrap();
            let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
            assert_eq!(ids, vec!["near", "mid", "far"], "accelerated={accelerated}");
        }
    }

    #[test]
    fn ties_break_by_most_recently_seen() {
        let (conn, store) = test_store(false);
        insert_record(&conn, "old", None, 100);
        insert_record(&conn, "fresh", None, 900);
        store.upsert(&conn, "old", Sector::Semantic, &spike(0), 0).unwrap();
        store.upsert(&conn, "fresh", Sector::Semantic, &spike(0), 0).unwrap();

        let hits = store
            .search_similar(&conn, Sector::Semantic, &spike(0), 2, None)
            .unwrap();
        assert_eq!(hits[0].0, "fresh");
        assert_eq!(hits[1].0, "old");
    }

    #[test]
    fn search_is_tenant_scoped() {
        let (conn, store) = test_store(false);
        insert_record(&conn, "mine", Some("u1"), 0);
        insert_record(&conn, "theirs", Some("u2"), 0);
        insert_record(&conn, "global", None, 0);
        for id in ["mine", "theirs", "global"] {
            store.upsert(&conn, id, Sector::Semantic, &spike(0), 0).unwrap();
        }

        let hits = store
            .search_similar(&conn, Sector::Semantic, &spike(0), 10, Some("u1"))
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["mine"]);

        // None sees only the untenanted record
        let hits = store
            .search_similar(&conn, Sector::Semantic, &spike(0), 10, None)
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["global"]);
    }

    #[test]
    fn exact_and_accelerated_agree() {
        let (conn_a, exact) = test_store(false);
        let (conn_b, fast) = test_store(true);

        for (conn, store) in [(&conn_a, &exact), (&conn_b, &fast)] {
            for i in 0..DIM {
                let id = format!("r{i}");
                insert_record(conn, &id, None, i as i64);
                store.upsert(conn, &id, Sector::Semantic, &spike(i), 0).unwrap();
            }
        }

        let query = {
            let mut q = spike(3);
            q[4] = 0.5;
            q
        };
        let a = exact
            .search_similar(&conn_a, Sector::Semantic, &query, 4, None)
            .unwrap();
        let b = fast
            .search_similar(&conn_b, Sector::Semantic, &query, 4, None)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn global_search_spans_sectors_and_dedupes() {
        let (conn, store) = test_store(false);
        insert_record(&conn, "a", None, 0);
        insert_record(&conn, "b", None, 0);
        store.upsert(&conn, "a", Sector::Semantic, &spike(0), 0).unwrap();
        store.upsert(&conn, "a", Sector::Episodic, &spike(1), 0).unwrap();
        store.upsert(&conn, "b", Sector::Procedural, &spike(1), 0).unwrap();

        let hits = store.search(&conn, &spike(1), 10, None).unwrap();
        let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        // "a" appears once despite two sector entries
        assert_eq!(ids.iter().filter(|id| **id == "a").count(), 1);
        assert!(ids.contains(&"b"));
    }

    #[test]
    fn stale_dimensionality_fails_loudly() {
        let (conn, store) = test_store(false);
        insert_record(&conn, "a", None, 0);
        // Write a row claiming a different dimensionality, bypassing the store.
        conn.execute(
            "INSERT INTO vectors (record_id, sector, dim, embedding, updated_at) \
             VALUES ('a', 'semantic', 4, x'0000803F000000000000000000000000', 0)",
            [],
        )
        .unwrap();

        let err = store
            .search_similar(&conn, Sector::Semantic, &spike(0), 1, None)
            .unwrap_err();
        assert!(matches!(err, MemoryError::DimensionMismatch { .. }));
    }
}
