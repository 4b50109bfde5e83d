//! Text-to-vector embedding boundary.
//!
//! Real embedding backends (OpenAI, Ollama, local ONNX, ...) live outside the
//! core and are injected through [`EmbeddingProvider`]. The built-in
//! [`HashEmbedding`] is a deterministic, dependency-free fallback used by
//! tests and the CLI: token hashes scattered into buckets, L2-normalized. It
//! carries no semantics, but identical texts always embed identically and
//! token overlap produces vector overlap.

use xxhash_rust::xxh3::xxh3_64;

use crate::error::{MemoryError, Result};

/// Trait for embedding text into fixed-length vectors.
///
/// Implementations produce L2-normalized vectors of exactly `dimensions()`
/// length. All methods are synchronous — callers in async contexts should use
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Number of dimensions this provider produces.
    fn dimensions(&self) -> usize;
}

/// Deterministic bag-of-hashed-tokens embedding.
pub struct HashEmbedding {
    dim: usize,
}

impl HashEmbedding {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl EmbeddingProvider for HashEmbedding {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dim];
        for token in text.split_whitespace() {
            let h = xxh3_64(token.to_lowercase().as_bytes());
            let bucket = (h % self.dim as u64) as usize;
            // Sign bit decorrelates buckets shared by unrelated tokens
            let sign = if (h >> 63) == 1 { -1.0 } else { 1.0 };
            v[bucket] += sign;
        }

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        self.dim
    }
}

/// Create an embedding provider from config.
///
/// Only `"hash"` is built in; network and model-backed providers are injected
/// by the embedding layer that wraps this crate.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hash" => Ok(Box::new(HashEmbedding::new(config.dim))),
        other => Err(MemoryError::Other(format!(
            "unknown embedding provider: {other}. Supported: hash"
        ))),
    }
}
