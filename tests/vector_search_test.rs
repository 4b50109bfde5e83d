//! Vector store properties across both index strategies: codec exactness,
//! cosine identities, ranking parity, scan bounds.

mod helpers;

use rusqlite::Connection;

use mnema::db;
use mnema::record::store as records;
use mnema::record::types::{MemoryRecord, Sector};
use mnema::vector::{cosine_similarity, decode_vector, encode_vector, VectorStore};

const DIM: usize = 16;

fn test_store(accelerated: bool) -> (Connection, VectorStore) {
    let conn = db::open_memory_database(DIM).unwrap();
    (conn, VectorStore::new(DIM, 50, accelerated))
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

/// Deterministic pseudo-random vector from a seed.
fn seeded_vector(seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
    (0..DIM)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 33) as f32 / u32::MAX as f32) * 2.0 - 1.0
        })
        .collect()
}

#[test]
fn codec_round_trip_over_many_vectors() {
    for seed in 0..50u64 {
        let v = seeded_vector(seed);
        let decoded = decode_vector(&encode_vector(&v)).unwrap();
        assert_eq!(decoded, v, "seed {seed}");
    }
}

#[test]
fn cosine_identities_hold_for_arbitrary_vectors() {
    for seed in 1..20u64 {
        let v = seeded_vector(seed);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5, "seed {seed}");
        assert_eq!(cosine_similarity(&v, &vec![0.0; DIM]), 0.0);
    }
}

#[test]
fn strategies_produce_identical_rankings() {
    let (conn_exact, exact) = test_store(false);
    let (conn_fast, fast) = test_store(true);

    for seed in 0..30u64 {
        let id = format!("r{seed}");
        let v = seeded_vector(seed);
        for (conn, store) in [(&conn_exact, &exact), (&conn_fast, &fast)] {
            insert_record(conn, &id, None, seed as i64);
            store.upsert(conn, &id, Sector::Semantic, &v, 0).unwrap();
        }
    }

    for query_seed in 100..105u64 {
        let query = seeded_vector(query_seed);
        let a = exact
            .search_similar(&conn_exact, Sector::Semantic, &query, 10, None)
            .unwrap();
        let b = fast
            .search_similar(&conn_fast, Sector::Semantic, &query, 10, None)
            .unwrap();
        let ids_a: Vec<&str> = a.iter().map(|(id, _)| id.as_str()).collect();
        let ids_b: Vec<&str> = b.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids_a, ids_b, "query seed {query_seed}");
    }
}

#[test]
fn zero_query_vector_scores_everything_zero() {
    let (conn, store) = test_store(false);
    insert_record(&conn, "a", None, 5);
    store
        .upsert(&conn, "a", Sector::Semantic, &seeded_vector(1), 0)
        .unwrap();

    let hits = store
        .search_similar(&conn, Sector::Semantic, &vec![0.0; DIM], 5, None)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].1, 0.0, "zero vector similarity is 0, not NaN");
}

#[test]
fn global_scan_respects_row_cap() {
    // Store capped at 50 scanned rows; insert more than that.
    let (conn, store) = test_store(false);
    for i in 0..80 {
        let id = format!("r{i}");
        insert_record(&conn, &id, None, i);
        store
            .upsert(&conn, &id, Sector::Semantic, &seeded_vector(i as u64), 0)
            .unwrap();
    }

    // Bounded: results come from the first 50 rows only. The cap is a
    // documented approximation, so the assertion is on the bound itself.
    let hits = store.search(&conn, &seeded_vector(999), 100, None).unwrap();
    assert!(hits.len() <= 50);
    assert!(!hits.is_empty());
}

#[test]
fn per_sector_entries_are_independent() {
    let (conn, store) = test_store(false);
    insert_record(&conn, "a", None, 0);
    store.upsert(&conn, "a", Sector::Semantic, &seeded_vector(1), 0).unwrap();
    store.upsert(&conn, "a", Sector::Episodic, &seeded_vector(2), 0).unwrap();

    // Each sector search sees its own entry.
    let semantic = store
        .search_similar(&conn, Sector::Semantic, &seeded_vector(1), 1, None)
        .unwrap();
    assert!((semantic[0].1 - 1.0).abs() < 1e-5);

    let episodic = store
        .search_similar(&conn, Sector::Episodic, &seeded_vector(2), 1, None)
        .unwrap();
    assert!((episodic[0].1 - 1.0).abs() < 1e-5);
}
