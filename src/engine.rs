//! The engine boundary — the function-call contract the API layer consumes.
//!
//! [`MemoryEngine`] owns the shared connection, the vector store, the
//! injected embedding provider, and the maintenance scheduler. The write
//! path: classify → near-duplicate gate → insert → embed + index per sector
//! → waypoint link from the tenant's previously active record. The query
//! path: vector and keyword candidates merged, salience-boosted, then
//! expanded one hop through the waypoint graph with the traversal path
//! reported.

use rusqlite::Connection;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::{MaintenanceConfig, MnemaConfig};
use crate::db::{self, now_ms, with_tx};
use crate::decay;
use crate::embedding::EmbeddingProvider;
use crate::error::{MemoryError, Result};
use crate::graph::{self, Waypoint};
use crate::keyword::{self, classify::classify};
use crate::record::store as records;
use crate::record::types::{MemoryRecord, Sector};
use crate::record::fingerprint_of;
use crate::scheduler::{
    self, Scheduler, SqliteLock, TaskFn, TaskOptions, TaskStats,
};
use crate::temporal::{self, FactFilter, TemporalEdge, TemporalFact};
use crate::vector::{encode_vector, VectorStore};

/// Result of an ingest.
#[derive(Debug, Serialize)]
pub struct AddMemoryResult {
    pub id: String,
    pub sector: Sector,
    /// Sector vector entries written (0 when the duplicate gate fired).
    pub vectors_written: usize,
    /// `true` if an existing near-duplicate was reinforced instead.
    pub deduplicated: bool,
}

/// Filters applied to a query.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    pub sector: Option<Sector>,
    pub tags: Option<Vec<String>>,
    pub min_salience: Option<f64>,
    pub tenant: Option<String>,
}

/// One ranked match. `via` is the waypoint traversal path for expanded
/// results (empty for direct hits).
#[derive(Debug, Serialize)]
pub struct MemoryMatch {
    pub record: MemoryRecord,
    pub score: f64,
    pub via: Vec<String>,
}

pub struct MemoryEngine {
    conn: Arc<Mutex<Connection>>,
    config: Arc<MnemaConfig>,
    vectors: VectorStore,
    embedder: Arc<dyn EmbeddingProvider>,
    scheduler: Scheduler,
    /// Most recent record per tenant, for successor waypoint linking.
    last_active: Mutex<HashMap<Option<String>, String>>,
}

impl MemoryEngine {
    /// Open the durable store at the configured path.
    pub fn open(
        config: MnemaConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> anyhow::Result<Self> {
        let conn = db::open_database(config.resolved_db_path(), config.embedding.dim)?;
        Ok(Self::from_connection(conn, config, embedder))
    }

    /// In-memory engine for tests and ephemeral tooling.
    pub fn in_memory(
        config: MnemaConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> anyhow::Result<Self> {
        let conn = db::open_memory_database(config.embedding.dim)?;
        Ok(Self::from_connection(conn, config, embedder))
    }

    fn from_connection(
        conn: Connection,
        config: MnemaConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let conn = Arc::new(Mutex::new(conn));
        let vectors = VectorStore::new(
            config.embedding.dim,
            config.storage.global_scan_limit,
            true,
        );
        let scheduler = Scheduler::new(Arc::new(SqliteLock::new(Arc::clone(&conn))))
            .with_stats_sink(Arc::clone(&conn));
        Self {
            conn,
            config: Arc::new(config),
            vectors,
            embedder,
            scheduler,
            last_active: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &MnemaConfig {
        &self.config
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Shared handle to the underlying connection (CLI tooling).
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    // ── Ingest ───────────────────────────────────────────────────────────────

    /// Classify, dedup-gate, store, and index a new memory. Returns the
    /// stored (or reinforced) record id with its primary sector.
    pub fn add_memory(
        &self,
        content: &str,
        tags: Vec<String>,
        metadata: Option<serde_json::Value>,
        tenant: Option<&str>,
    ) -> Result<AddMemoryResult> {
        let now = now_ms();
        let min_len = self.config.retrieval.min_token_len;
        let classification = classify(content, min_len);
        let sector = classification.primary;
        let fingerprint = fingerprint_of(content);

        // Embed before taking the connection; providers may be slow.
        let embedding = self.embedder.embed(content)?;

        let mut conn = self.conn();
        let config = Arc::clone(&self.config);
        let vectors = &self.vectors;

        let result = with_tx(&mut conn, |tx| {
            // Near-duplicate gate: reinforce the existing record instead of
            // storing a copy.
            if let Some(existing) = records::find_near_duplicate(
                tx,
                sector,
                tenant,
                fingerprint,
                config.ingest.dedup_hamming,
            )? {
                decay::reinforce(tx, &existing, config.decay.access_boost, &config.decay, now)?;
                tracing::debug!(id = %existing, "near-duplicate reinforced");
                return Ok(AddMemoryResult {
                    id: existing,
                    sector,
                    vectors_written: 0,
                    deduplicated: true,
                });
            }

            let record = MemoryRecord {
                id: uuid::Uuid::now_v7().to_string(),
                tenant: tenant.map(String::from),
                sector,
                content: content.to_string(),
                tags,
                metadata,
                fingerprint,
                salience: 1.0,
                decay_lambda: config.decay.lambda_for(sector),
                version: 1,
                reflected: false,
                created_at: now,
                updated_at: now,
                last_seen_at: now,
            };
            records::insert(tx, &record)?;

            let mut vectors_written = 0;
            for s in classification.all() {
                vectors.upsert(tx, &record.id, s, &embedding, now)?;
                vectors_written += 1;
            }
            records::set_mean_vector(tx, &record.id, &encode_vector(&embedding))?;

            // Associative successor: the tenant's previous record led here.
            if config.ingest.link_previous {
                let mut last = lock_plain(&self.last_active);
                let key = tenant.map(String::from);
                if let Some(prev) = last.get(&key) {
                    graph::link(tx, prev, &record.id, tenant, config.graph.initial_weight, now)?;
                }
                last.insert(key, record.id.clone());
            }

            tracing::info!(id = %record.id, sector = %sector, vectors_written, "memory stored");
            Ok(AddMemoryResult {
                id: record.id,
                sector,
                vectors_written,
                deduplicated: false,
            })
        })?;

        Ok(result)
    }

    // ── Query ────────────────────────────────────────────────────────────────

    /// Hybrid retrieval: vector similarity + keyword relevance + salience,
    /// expanded one hop through the waypoint graph. Direct hits are capped at
    /// `k`; expanded neighbors ride along with their traversal path in `via`.
    /// Returned records are touched (salience reinforced, `last_seen_at`
    /// refreshed) — access is reinforcement.
    pub fn query_memory(
        &self,
        query: &str,
        k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<MemoryMatch>> {
        let now = now_ms();
        let retrieval = &self.config.retrieval;
        let tenant = filters.tenant.as_deref();
        let k = if k == 0 { retrieval.default_k } else { k };

        let query_vec = self.embedder.embed(query)?;
        let sectors: Vec<Sector> = match filters.sector {
            Some(s) => vec![s],
            None => Sector::ALL.to_vec(),
        };

        let conn = self.conn();

        // Vector candidates per sector, keeping each record's best score.
        let mut cosine: HashMap<String, f32> = HashMap::new();
        for sector in &sectors {
            let hits = self.vectors.search_similar(
                &conn,
                *sector,
                &query_vec,
                k * retrieval.candidate_multiplier,
                tenant,
            )?;
            for (id, score) in hits {
                let entry = cosine.entry(id).or_insert(score);
                if score > *entry {
                    *entry = score;
                }
            }
        }

        // Keyword corpus: vector candidates plus a bounded page of recent
        // records in scope.
        let candidate_ids: Vec<&str> = cosine.keys().map(String::as_str).collect();
        let mut corpus = records::get_by_ids(&conn, &candidate_ids)?;
        let recent = records::list_by_tenant(&conn, tenant, None, retrieval.keyword_scan_limit)?;
        for record in recent.records {
            corpus.entry(record.id.clone()).or_insert(record);
        }

        let docs: Vec<(&str, &str)> = corpus
            .values()
            .map(|r| (r.id.as_str(), r.content.as_str()))
            .collect();
        let keyword_scores =
            keyword::keyword_filter(query, &docs, retrieval.keyword_threshold, retrieval.min_token_len);

        // Merge, filter, score.
        let ceiling = self.config.decay.ceiling();
        let mut ranked: Vec<(String, f64, i64)> = Vec::new();
        for (id, record) in &corpus {
            if !record_passes(record, filters) {
                continue;
            }
            let cos = cosine.get(id).copied().unwrap_or(0.0) as f64;
            let kw = keyword_scores.get(id).copied().unwrap_or(0.0);
            if cos <= 0.0 && kw <= 0.0 {
                continue;
            }
            let salience_norm = (record.salience / ceiling).clamp(0.0, 1.0);
            let score = retrieval.vector_weight * cos
                + retrieval.keyword_weight * kw
                + retrieval.salience_weight * salience_norm;
            ranked.push((id.clone(), score, record.last_seen_at));
        }
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.2.cmp(&a.2))
        });
        ranked.truncate(k);

        let mut results: Vec<MemoryMatch> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for (id, score, _) in &ranked {
            if let Some(record) = corpus.get(id) {
                seen.insert(id.clone());
                results.push(MemoryMatch {
                    record: record.clone(),
                    score: *score,
                    via: Vec::new(),
                });
            }
        }

        // One-hop waypoint expansion from the direct hits.
        let mut expansions: Vec<MemoryMatch> = Vec::new();
        for hit in &results {
            for edge in graph::neighbors(&conn, &hit.record.id, tenant)? {
                if seen.contains(&edge.dest_id) {
                    continue;
                }
                let Some(neighbor) = records::get(&conn, &edge.dest_id)? else {
                    continue;
                };
                if !record_passes(&neighbor, filters) {
                    continue;
                }
                seen.insert(edge.dest_id.clone());
                expansions.push(MemoryMatch {
                    record: neighbor,
                    score: hit.score * edge.weight * retrieval.expansion_factor,
                    via: vec![hit.record.id.clone()],
                });
            }
        }
        results.extend(expansions);

        // Access is reinforcement: boost salience and refresh last_seen.
        for matched in &results {
            let boosted = (matched.record.salience + self.config.decay.access_boost).min(ceiling);
            records::touch(&conn, &matched.record.id, boosted, now)?;
        }

        Ok(results)
    }

    // ── Record lifecycle ─────────────────────────────────────────────────────

    /// Boost a record's salience.
    pub fn reinforce_memory(&self, id: &str, boost: f64) -> Result<f64> {
        let conn = self.conn();
        decay::reinforce(&conn, id, boost, &self.config.decay, now_ms())
    }

    /// Delete a record: vector entries and waypoints go with it; temporal
    /// facts are independent and stay.
    pub fn delete_memory(&self, id: &str) -> Result<()> {
        let mut conn = self.conn();
        let vectors = &self.vectors;
        with_tx(&mut conn, |tx| {
            vectors.remove(tx, id)?;
            graph::unlink_all(tx, id)?;
            records::delete(tx, id)
        })?;

        let mut last = lock_plain(&self.last_active);
        last.retain(|_, active| active != id);
        Ok(())
    }

    /// Explicitly move a record to another sector, re-indexing its vectors.
    pub fn reclassify_memory(&self, id: &str, sector: Sector) -> Result<()> {
        let now = now_ms();
        let mut conn = self.conn();
        let vectors = &self.vectors;
        let lambda = self.config.decay.lambda_for(sector);
        with_tx(&mut conn, |tx| {
            let record =
                records::get(tx, id)?.ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
            if record.sector == sector {
                return Ok(());
            }
            records::set_sector(tx, id, sector, lambda, now)?;
            vectors.reindex_sector(tx, id, record.sector, sector, now)
        })
    }

    // ── Waypoints ────────────────────────────────────────────────────────────

    pub fn link_waypoint(
        &self,
        source_id: &str,
        dest_id: &str,
        tenant: Option<&str>,
        weight: f64,
    ) -> Result<()> {
        graph::link(&self.conn(), source_id, dest_id, tenant, weight, now_ms())
    }

    pub fn neighbors(&self, source_id: &str, tenant: Option<&str>) -> Result<Vec<Waypoint>> {
        graph::neighbors(&self.conn(), source_id, tenant)
    }

    // ── Temporal facts ───────────────────────────────────────────────────────

    pub fn assert_fact(&self, fact: &TemporalFact) -> Result<String> {
        temporal::assert_fact(&self.conn(), fact)
    }

    pub fn query_facts(&self, filter: &FactFilter, as_of: Option<i64>) -> Result<Vec<TemporalFact>> {
        temporal::query_facts(&self.conn(), filter, as_of)
    }

    pub fn invalidate_fact(&self, id: &str, valid_to: i64) -> Result<()> {
        temporal::invalidate_fact(&self.conn(), id, valid_to, now_ms())
    }

    pub fn link_fact_edge(&self, edge: &TemporalEdge) -> Result<String> {
        temporal::link_edge(&self.conn(), edge)
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    /// Register a caller-supplied maintenance task.
    pub fn register_maintenance_task(
        &self,
        name: &str,
        period: Duration,
        opts: TaskOptions,
        task: TaskFn,
    ) {
        self.scheduler.register_interval(name, period, opts, task);
    }

    /// Wire up the stock decay / reflect / consolidate tasks on their
    /// configured intervals.
    pub fn start_maintenance(&self) {
        let m = &self.config.maintenance;
        let opts = TaskOptions {
            timeout: Some(Duration::from_secs(m.task_timeout_secs)),
        };

        self.register_maintenance_task(
            "decay",
            Duration::from_secs(m.decay_interval_secs),
            opts.clone(),
            self.blocking_task(|conn, config| {
                let result = decay::run_decay_batch(conn, &config.decay, now_ms())?;
                Ok(result.updated as u64)
            }),
        );

        self.register_maintenance_task(
            "reflect",
            Duration::from_secs(m.reflect_interval_secs),
            opts.clone(),
            self.blocking_task(|conn, config| run_reflect(conn, &config.maintenance)),
        );

        self.register_maintenance_task(
            "consolidate",
            Duration::from_secs(m.consolidate_interval_secs),
            opts,
            self.blocking_task(|conn, config| run_consolidate(conn, config)),
        );
    }

    /// Per-task scheduler counters.
    pub fn maintenance_stats(&self) -> HashMap<String, TaskStats> {
        self.scheduler.stats()
    }

    /// Cancel all maintenance intervals and release held locks.
    pub fn stop_maintenance(&self) {
        self.scheduler.stop_all();
    }

    /// Wrap a blocking store operation as a scheduler task future.
    fn blocking_task(
        &self,
        f: fn(&Connection, &MnemaConfig) -> Result<u64>,
    ) -> TaskFn {
        let conn = Arc::clone(&self.conn);
        let config = Arc::clone(&self.config);
        Arc::new(move || {
            let conn = Arc::clone(&conn);
            let config = Arc::clone(&config);
            Box::pin(async move {
                tokio::task::spawn_blocking(move || {
                    let guard = match conn.lock() {
                        Ok(g) => g,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    f(&guard, &config)
                })
                .await
                .map_err(|e| MemoryError::Other(format!("maintenance task aborted: {e}")))?
            })
        })
    }
}

fn lock_plain<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn record_passes(record: &MemoryRecord, filters: &QueryFilters) -> bool {
    if let Some(sector) = filters.sector {
        if record.sector != sector {
            return false;
        }
    }
    if let Some(min) = filters.min_salience {
        if record.salience < min {
            return false;
        }
    }
    if let Some(ref tags) = filters.tags {
        if !tags.is_empty() && !tags.iter().any(|t| record.tags.contains(t)) {
            return false;
        }
    }
    true
}

/// Reflection trigger: flag tenants whose un-reflected record count crossed
/// the threshold and mark those records reflected. Summaries themselves are
/// produced by the layer above; the engine records that reflection is due.
/// Per-tenant failures are logged and skipped.
pub fn run_reflect(conn: &Connection, config: &MaintenanceConfig) -> Result<u64> {
    let counts = records::unreflected_counts(conn)?;
    let mut flagged = 0u64;
    for (tenant, count) in counts {
        if (count as usize) < config.reflect_threshold {
            continue;
        }
        match records::mark_reflected(conn, tenant.as_deref()) {
            Ok(marked) => {
                tracing::info!(tenant = ?tenant, marked, "reflection due");
                flagged += 1;
            }
            Err(e) => {
                tracing::warn!(tenant = ?tenant, error = %e, "reflect skip");
            }
        }
    }
    Ok(flagged)
}

/// Consolidation: prune weak waypoints and trim aged stat rows.
pub fn run_consolidate(conn: &Connection, config: &MnemaConfig) -> Result<u64> {
    let pruned = graph::prune(conn, config.graph.prune_threshold)?;
    let cutoff =
        now_ms() - (config.maintenance.stats_retention_days as i64) * 86_400_000;
    let trimmed = scheduler::trim_stats(conn, cutoff)?;
    tracing::info!(pruned, trimmed, "consolidation complete");
    Ok((pruned + trimmed) as u64)
}
