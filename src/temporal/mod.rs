//! Bitemporal fact and edge storage.
//!
//! Facts are (subject, predicate, object) triples with a validity interval.
//! History is append-only: invalidation closes `valid_to`, never deletes, so
//! "what did we believe as of T" stays answerable. Edges are typed, weighted
//! links between facts and are invalidated with their facts — an edge never
//! dangles past its endpoints.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{MemoryError, Result};

/// A bitemporal fact, matching the `temporal_facts` table schema.
/// Natural key: (subject, predicate, object, valid_from).
#[derive(Debug, Clone, Serialize)]
pub struct TemporalFact {
    pub id: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    /// Epoch millis at which the fact became true in the world.
    pub valid_from: i64,
    /// Epoch millis at which it stopped being true. `None` = still valid.
    pub valid_to: Option<i64>,
    pub confidence: f64,
    pub last_updated: i64,
    pub metadata: Option<serde_json::Value>,
}

impl TemporalFact {
    /// New open-ended fact with full confidence.
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        valid_from: i64,
        now: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            valid_from,
            valid_to: None,
            confidence: 1.0,
            last_updated: now,
            metadata: None,
        }
    }

    /// Was this fact valid at the given instant?
    pub fn valid_at(&self, as_of: i64) -> bool {
        self.valid_from <= as_of && self.valid_to.is_none_or(|t| t >= as_of)
    }
}

/// A typed edge between two facts.
#[derive(Debug, Clone, Serialize)]
pub struct TemporalEdge {
    pub id: String,
    pub source_fact_id: String,
    pub target_fact_id: String,
    pub relation: String,
    pub valid_from: i64,
    pub valid_to: Option<i64>,
    pub weight: f64,
    pub metadata: Option<serde_json::Value>,
}

/// Subset filter for fact queries. `None` fields match anything.
#[derive(Debug, Clone, Default)]
pub struct FactFilter {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<String>,
}

const FACT_COLUMNS: &str =
    "id, subject, predicate, object, valid_from, valid_to, confidence, last_updated, metadata";

fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<TemporalFact> {
    let metadata_str: Option<String> = row.get(8)?;
    Ok(TemporalFact {
        id: row.get(0)?,
        subject: row.get(1)?,
        predicate: row.get(2)?,
        object: row.get(3)?,
        valid_from: row.get(4)?,
        valid_to: row.get(5)?,
        confidence: row.get(6)?,
        last_updated: row.get(7)?,
        metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

/// Insert a fact, or replace in place when the natural key
/// (subject, predicate, object, valid_from) already exists — re-assertion is
/// idempotent and keeps the original id. Returns the stored fact's id.
pub fn assert_fact(conn: &Connection, fact: &TemporalFact) -> Result<String> {
    let metadata_json = fact
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM temporal_facts \
             WHERE subject = ?1 AND predicate = ?2 AND object = ?3 AND valid_from = ?4",
            params![fact.subject, fact.predicate, fact.object, fact.valid_from],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE temporal_facts SET confidence = ?1, metadata = ?2, last_updated = ?3 \
                 WHERE id = ?4",
                params![fact.confidence, metadata_json, fact.last_updated, id],
            )?;
            Ok(id)
        }
        None => {
            conn.execute(
                "INSERT INTO temporal_facts \
                 (id, subject, predicate, object, valid_from, valid_to, confidence, last_updated, metadata) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    fact.id,
                    fact.subject,
                    fact.predicate,
                    fact.object,
                    fact.valid_from,
                    fact.valid_to,
                    fact.confidence,
                    fact.last_updated,
                    metadata_json,
                ],
            )?;
            Ok(fact.id.clone())
        }
    }
}

/// Facts matching any subset of subject/predicate/object, optionally
/// restricted to those valid at `as_of`
/// (`valid_from <= as_of AND (valid_to IS NULL OR valid_to >= as_of)`).
pub fn query_facts(
    conn: &Connection,
    filter: &FactFilter,
    as_of: Option<i64>,
) -> Result<Vec<TemporalFact>> {
    let mut sql = format!("SELECT {FACT_COLUMNS} FROM temporal_facts WHERE 1=1");
    let mut bind: Vec<&dyn rusqlite::types::ToSql> = Vec::new();

    if let Some(ref subject) = filter.subject {
        sql.push_str(&format!(" AND subject = ?{}", bind.len() + 1));
        bind.push(subject);
    }
    if let Some(ref predicate) = filter.predicate {
        sql.push_str(&format!(" AND predicate = ?{}", bind.len() + 1));
        bind.push(predicate);
    }
    if let Some(ref object) = filter.object {
        sql.push_str(&format!(" AND object = ?{}", bind.len() + 1));
        bind.push(object);
    }
    if let Some(ref as_of) = as_of {
        sql.push_str(&format!(
            " AND valid_from <= ?{n} AND (valid_to IS NULL OR valid_to >= ?{n})",
            n = bind.len() + 1
        ));
        bind.push(as_of);
    }
    sql.push_str(" ORDER BY valid_from");

    let mut stmt = conn.prepare(&sql)?;
    let facts = stmt
        .query_map(bind.as_slice(), row_to_fact)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(facts)
}

/// Fetch one fact by id.
pub fn get_fact(conn: &Connection, id: &str) -> Result<Option<TemporalFact>> {
    let fact = conn
        .query_row(
            &format!("SELECT {FACT_COLUMNS} FROM temporal_facts WHERE id = ?1"),
            params![id],
            row_to_fact,
        )
        .optional()?;
    Ok(fact)
}

/// Close a fact's validity at `valid_to` and bump `last_updated`. The row is
/// never deleted. Edges touching the fact that are still open are closed at
/// the same instant, so none outlives its endpoints.
pub fn invalidate_fact(conn: &Connection, id: &str, valid_to: i64, now: i64) -> Result<()> {
    let rows = conn.execute(
        "UPDATE temporal_facts SET valid_to = ?1, last_updated = ?2 WHERE id = ?3",
        params![valid_to, now, id],
    )?;
    if rows == 0 {
        return Err(MemoryError::NotFound(format!("temporal fact {id}")));
    }

    conn.execute(
        "UPDATE temporal_edges SET valid_to = ?1 \
         WHERE (source_fact_id = ?2 OR target_fact_id = ?2) AND valid_to IS NULL",
        params![valid_to, id],
    )?;
    Ok(())
}

/// Upsert an edge on (source, target, relation). Both endpoint facts must
/// exist; an existing edge keeps its id and has interval, weight, and
/// metadata replaced.
pub fn link_edge(conn: &Connection, edge: &TemporalEdge) -> Result<String> {
    for endpoint in [&edge.source_fact_id, &edge.target_fact_id] {
        let exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM temporal_facts WHERE id = ?1",
            params![endpoint],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(MemoryError::NotFound(format!("temporal fact {endpoint}")));
        }
    }

    let metadata_json = edge
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM temporal_edges \
             WHERE source_fact_id = ?1 AND target_fact_id = ?2 AND relation = ?3",
            params![edge.source_fact_id, edge.target_fact_id, edge.relation],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE temporal_edges SET valid_from = ?1, valid_to = ?2, weight = ?3, \
                 metadata = ?4 WHERE id = ?5",
                params![edge.valid_from, edge.valid_to, edge.weight, metadata_json, id],
            )?;
            Ok(id)
        }
        None => {
            conn.execute(
                "INSERT INTO temporal_edges \
                 (id, source_fact_id, target_fact_id, relation, valid_from, valid_to, weight, metadata) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    edge.id,
                    edge.source_fact_id,
                    edge.target_fact_id,
                    edge.relation,
                    edge.valid_from,
                    edge.valid_to,
                    edge.weight,
                    metadata_json,
                ],
            )?;
            Ok(edge.id.clone())
        }
    }
}

/// Outgoing edges of a fact.
pub fn edges_from(conn: &Connection, fact_id: &str) -> Result<Vec<TemporalEdge>> {
    let mut stmt = conn.prepare(
        "SELECT id, source_fact_id, target_fact_id, relation, valid_from, valid_to, weight, metadata \
         FROM temporal_edges WHERE source_fact_id = ?1 ORDER BY valid_from",
    )?;
    let edges = stmt
        .query_map(params![fact_id], |row| {
            let metadata_str: Option<String> = row.get(7)?;
            Ok(TemporalEdge {
                id: row.get(0)?,
                source_fact_id: row.get(1)?,
                target_fact_id: row.get(2)?,
                relation: row.get(3)?,
                valid_from: row.get(4)?,
                valid_to: row.get(5)?,
                weight: row.get(6)?,
                metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_db() -> Connection {
        db::open_memory_database(8).unwrap()
    }

    #[test]
    fn assert_and_query_round_trip() {
        let conn = test_db();
        let fact = TemporalFact::new("alice", "works_at", "acme", 1_000, 1_000);
        let id = assert_fact(&conn, &fact).unwrap();
        assert_eq!(id, fact.id);

        let found = query_facts(
            &conn,
            &FactFilter {
                subject: Some("alice".into()),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].object, "acme");
    }

    #[test]
    fn reassertion_is_idempotent_and_keeps_id() {
        let conn = test_db();
        let fact = TemporalFact::new("alice", "works_at", "acme", 1_000, 1_000);
        let first = assert_fact(&conn, &fact).unwrap();

        let mut again = TemporalFact::new("alice", "works_at", "acme", 1_000, 2_000);
        again.confidence = 0.7;
        let second = assert_fact(&conn, &again).unwrap();

        assert_eq!(first, second, "re-assertion replaces in place");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM temporal_facts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);

        let stored = get_fact(&conn, &first).unwrap().unwrap();
        assert!((stored.confidence - 0.7).abs() < 1e-9);
        assert_eq!(stored.last_updated, 2_000);
    }

    #[test]
    fn bitemporal_as_of_query() {
        let conn = test_db();
        let fact = TemporalFact::new("alice", "works_at", "acme", 1_000, 1_000);
        let id = assert_fact(&conn, &fact).unwrap();
        invalidate_fact(&conn, &id, 2_000, 2_000).unwrap();

        let filter = FactFilter {
            subject: Some("alice".into()),
            ..Default::default()
        };

        // Valid mid-interval
        let mid = query_facts(&conn, &filter, Some(1_500)).unwrap();
        assert_eq!(mid.len(), 1);

        // Not yet valid before valid_from
        let before = query_facts(&conn, &filter, Some(500)).unwrap();
        assert!(before.is_empty());

        // No longer valid after invalidation
        let after = query_facts(&conn, &filter, Some(2_500)).unwrap();
        assert!(after.is_empty());

        // History is retained: unfiltered query still sees the row
        let all = query_facts(&conn, &filter, None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].valid_to, Some(2_000));
    }

    #[test]
    fn invalidate_missing_fact_fails() {
        let conn = test_db();
        let err = invalidate_fact(&conn, "ghost", 1_000, 1_000).unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
    }

    #[test]
    fn filter_matches_any_subset() {
        let conn = test_db();
        assert_fact(&conn, &TemporalFact::new("alice", "works_at", "acme", 1_000, 1_000)).unwrap();
        assert_fact(&conn, &TemporalFact::new("bob", "works_at", "acme", 1_000, 1_000)).unwrap();
        assert_fact(&conn, &TemporalFact::new("alice", "lives_in", "berlin", 1_000, 1_000))
            .unwrap();

        let by_predicate = query_facts(
            &conn,
            &FactFilter {
                predicate: Some("works_at".into()),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(by_predicate.len(), 2);

        let by_subject_and_object = query_facts(
            &conn,
            &FactFilter {
                subject: Some("alice".into()),
                object: Some("berlin".into()),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(by_subject_and_object.len(), 1);

        let everything = query_facts(&conn, &FactFilter::default(), None).unwrap();
        assert_eq!(everything.len(), 3);
    }

    #[test]
    fn edges_require_existing_endpoints() {
        let conn = test_db();
        let f1 = TemporalFact::new("alice", "works_at", "acme", 1_000, 1_000);
        assert_fact(&conn, &f1).unwrap();

        let edge = TemporalEdge {
            id: uuid::Uuid::now_v7().to_string(),
            source_fact_id: f1.id.clone(),
            target_fact_id: "ghost".into(),
            relation: "caused_by".into(),
            valid_from: 1_000,
            valid_to: None,
            weight: 1.0,
            metadata: None,
        };
        let err = link_edge(&conn, &edge).unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
    }

    #[test]
    fn edge_upsert_and_listing() {
        let conn = test_db();
        let f1 = TemporalFact::new("alice", "works_at", "acme", 1_000, 1_000);
        let f2 = TemporalFact::new("acme", "based_in", "berlin", 1_000, 1_000);
        assert_fact(&conn, &f1).unwrap();
        assert_fact(&conn, &f2).unwrap();

        let mut edge = TemporalEdge {
            id: uuid::Uuid::now_v7().to_string(),
            source_fact_id: f1.id.clone(),
            target_fact_id: f2.id.clone(),
            relation: "supports".into(),
            valid_from: 1_000,
            valid_to: None,
            weight: 0.4,
            metadata: None,
        };
        let first = link_edge(&conn, &edge).unwrap();

        // Upsert on (source, target, relation) keeps the id
        edge.id = uuid::Uuid::now_v7().to_string();
        edge.weight = 0.9;
        let second = link_edge(&conn, &edge).unwrap();
        assert_eq!(first, second);

        let out = edges_from(&conn, &f1.id).unwrap();
        assert_eq!(out.len(), 1);
        assert!((out[0].weight - 0.9).abs() < 1e-9);
    }

    #[test]
    fn invalidation_closes_open_edges() {
        let conn = test_db();
        let f1 = TemporalFact::new("alice", "works_at", "acme", 1_000, 1_000);
        let f2 = TemporalFact::new("acme", "based_in", "berlin", 1_000, 1_000);
        assert_fact(&conn, &f1).unwrap();
        assert_fact(&conn, &f2).unwrap();
        link_edge(
            &conn,
            &TemporalEdge {
                id: uuid::Uuid::now_v7().to_string(),
                source_fact_id: f1.id.clone(),
                target_fact_id: f2.id.clone(),
                relation: "supports".into(),
                valid_from: 1_000,
                valid_to: None,
                weight: 1.0,
                metadata: None,
            },
        )
        .unwrap();

        invalidate_fact(&conn, &f1.id, 5_000, 5_000).unwrap();

        let out = edges_from(&conn, &f1.id).unwrap();
        assert_eq!(out[0].valid_to, Some(5_000), "edge closed with its fact");
    }

    #[test]
    fn valid_at_helper() {
        let mut fact = TemporalFact::new("s", "p", "o", 1_000, 1_000);
        assert!(fact.valid_at(1_000));
        assert!(fact.valid_at(999_999));
        assert!(!fact.valid_at(999));

        fact.valid_to = Some(2_000);
        assert!(fact.valid_at(2_000));
        assert!(!fact.valid_at(2_001));
    }
}
