#![allow(dead_code)]

use std::sync::Arc;

use mnema::config::MnemaConfig;
use mnema::embedding::HashEmbedding;
use mnema::engine::MemoryEngine;

/// Small dimensionality keeps tests fast; the engine never special-cases it.
pub const DIM: usize = 32;

/// Config tuned for tests: tiny vectors, explicit waypoint linking only.
pub fn test_config() -> MnemaConfig {
    let mut config = MnemaConfig::default();
    config.embedding.dim = DIM;
    config.ingest.link_previous = false;
    config
}

/// In-memory engine with the deterministic hash embedder.
pub fn test_engine() -> MemoryEngine {
    engine_with(test_config())
}

pub fn engine_with(config: MnemaConfig) -> MemoryEngine {
    let dim = config.embedding.dim;
    MemoryEngine::in_memory(config, Arc::new(HashEmbedding::new(dim))).unwrap()
}

/// Deterministic embedding with a spike at position `seed`.
pub fn test_embedding(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[seed % DIM] = 1.0;
    v
}
