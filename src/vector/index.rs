//! Index strategies behind the vector store.
//!
//! [`ExactScanIndex`] keeps no auxiliary structures: every search is a full
//! cosine scan over the rows in scope — always correct, O(n). The
//! [`AcceleratedIndex`] mirrors writes into per-sector `vec0` virtual tables
//! and answers searches with a KNN candidate set; the store re-scores
//! candidates with exact cosine so both strategies rank identically. The
//! store picks one strategy at construction time, not per call.

use rusqlite::{params, Connection};

use crate::db::schema::vec_table;
use crate::error::Result;
use crate::record::types::Sector;
use crate::vector::encode_vector;

pub trait VectorIndex: Send + Sync {
    fn name(&self) -> &'static str;

    /// Mirror a vector write into the index.
    fn upsert(&self, conn: &Connection, sector: Sector, id: &str, vector: &[f32]) -> Result<()>;

    /// Drop every index entry for a record.
    fn remove(&self, conn: &Connection, id: &str) -> Result<()>;

    /// KNN candidate ids for a sector, nearest first. `Ok(None)` means the
    /// index offers no acceleration and the caller must scan.
    fn candidates(
        &self,
        conn: &Connection,
        sector: Sector,
        query: &[f32],
        limit: usize,
    ) -> Result<Option<Vec<String>>>;
}

/// Brute-force strategy. Maintains nothing, accelerates nothing.
pub struct ExactScanIndex;

impl VectorIndex for ExactScanIndex {
    fn name(&self) -> &'static str {
        "exact-scan"
    }

    fn upsert(&self, _conn: &Connection, _sector: Sector, _id: &str, _vector: &[f32]) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _conn: &Connection, _id: &str) -> Result<()> {
        Ok(())
    }

    fn candidates(
        &self,
        _conn: &Connection,
        _sector: Sector,
        _query: &[f32],
        _limit: usize,
    ) -> Result<Option<Vec<String>>> {
        Ok(None)
    }
}

/// sqlite-vec backed strategy: one `vec0` table per sector.
pub struct AcceleratedIndex;

impl VectorIndex for AcceleratedIndex {
    fn name(&self) -> &'static str {
        "sqlite-vec"
    }

    fn upsert(&self, conn: &Connection, sector: Sector, id: &str, vector: &[f32]) -> Result<()> {
        let table = vec_table(sector);
        // vec0 has no native upsert; replace by delete + insert.
        conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
        conn.execute(
            &format!("INSERT INTO {table} (id, embedding) VALUES (?1, ?2)"),
            params![id, encode_vector(vector)],
        )?;
        Ok(())
    }

    fn remove(&self, conn: &Connection, id: &str) -> Result<()> {
        for sector in Sector::ALL {
            conn.execute(
                &format!("DELETE FROM {} WHERE id = ?1", vec_table(sector)),
                params![id],
            )?;
        }
        Ok(())
    }

    fn candidates(
        &self,
        conn: &Connection,
        sector: Sector,
        query: &[f32],
        limit: usize,
    ) -> Result<Option<Vec<String>>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT id FROM {} WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
            vec_table(sector),
        ))?;
        let ids = stmt
            .query_map(params![encode_vector(query), limit as i64], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Some(ids))
    }
}
