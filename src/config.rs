use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::record::types::Sector;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MnemaConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub ingest: IngestConfig,
    pub graph: GraphConfig,
    pub decay: DecayConfig,
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Row cap for the cross-sector global vector scan. A documented
    /// approximation — ungoverned tenants never trigger an unbounded scan.
    pub global_scan_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub dim: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,
    /// Vector candidates fetched per sector = k * candidate_multiplier.
    pub candidate_multiplier: usize,
    /// Upper bound on recent records pulled into keyword scoring per query.
    pub keyword_scan_limit: usize,
    pub min_token_len: usize,
    pub keyword_threshold: f64,
    pub vector_weight: f64,
    pub keyword_weight: f64,
    pub salience_weight: f64,
    /// Score multiplier applied to waypoint-expanded neighbors.
    pub expansion_factor: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    /// Max hamming distance between content fingerprints for the
    /// near-duplicate gate to fire.
    pub dedup_hamming: u32,
    /// Link each new record from the tenant's previously active record.
    pub link_previous: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GraphConfig {
    /// Weight assigned to auto-created successor waypoints.
    pub initial_weight: f64,
    /// Edges below this weight are removed by the consolidate task.
    pub prune_threshold: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DecayConfig {
    /// Salience never decays below this floor.
    pub floor: f64,
    /// Bounds a single reinforcement boost; also sets the salience ceiling
    /// (1.0 + max_boost).
    pub max_boost: f64,
    /// Boost applied when a record is returned from a query.
    pub access_boost: f64,
    /// Records re-scored per decay batch.
    pub batch_size: usize,
    /// Per-day decay constants, one per sector.
    pub lambda_episodic: f64,
    pub lambda_semantic: f64,
    pub lambda_procedural: f64,
    pub lambda_emotional: f64,
    pub lambda_reflective: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub decay_interval_secs: u64,
    pub reflect_interval_secs: u64,
    pub consolidate_interval_secs: u64,
    /// Per-task execution budget. A run exceeding it is recorded as a
    /// failure and the task stays eligible for its next tick.
    pub task_timeout_secs: u64,
    /// Un-reflected record count at which a tenant is flagged for reflection.
    pub reflect_threshold: usize,
    /// Stat rows older than this are trimmed by the consolidate task.
    pub stats_retention_days: u64,
}

impl Default for MnemaConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            ingest: IngestConfig::default(),
            graph: GraphConfig::default(),
            decay: DecayConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_mnema_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            global_scan_limit: 5000,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hash".into(),
            dim: 384,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 8,
            candidate_multiplier: 3,
            keyword_scan_limit: 256,
            min_token_len: 3,
            keyword_threshold: 0.05,
            vector_weight: 0.55,
            keyword_weight: 0.30,
            salience_weight: 0.15,
            expansion_factor: 0.5,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedup_hamming: 4,
            link_previous: true,
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            initial_weight: 0.5,
            prune_threshold: 0.05,
        }
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            floor: 0.02,
            max_boost: 0.5,
            access_boost: 0.05,
            batch_size: 512,
            lambda_episodic: 0.08,
            lambda_semantic: 0.01,
            lambda_procedural: 0.01,
            lambda_emotional: 0.05,
            lambda_reflective: 0.03,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            decay_interval_secs: 3600,
            reflect_interval_secs: 21_600,
            consolidate_interval_secs: 86_400,
            task_timeout_secs: 300,
            reflect_threshold: 20,
            stats_retention_days: 30,
        }
    }
}

impl DecayConfig {
    /// Per-day decay constant for a sector.
    pub fn lambda_for(&self, sector: Sector) -> f64 {
        match sector {
            Sector::Episodic => self.lambda_episodic,
            Sector::Semantic => self.lambda_semantic,
            Sector::Procedural => self.lambda_procedural,
            Sector::Emotional => self.lambda_emotional,
            Sector::Reflective => self.lambda_reflective,
        }
    }

    /// Ceiling applied to salience after reinforcement.
    pub fn ceiling(&self) -> f64 {
        1.0 + self.max_boost
    }
}

/// Returns `~/.mnema/`
pub fn default_mnema_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".mnema")
}

/// Returns the default config file path: `~/.mnema/config.toml`
pub fn default_config_path() -> PathBuf {
    default_mnema_dir().join("config.toml")
}

impl MnemaConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MnemaConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (MNEMA_DB, MNEMA_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEMA_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MNEMA_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
