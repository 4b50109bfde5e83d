//! Vector serialization and similarity primitives.
//!
//! Vectors are packed as fixed-width little-endian f32 arrays. The stored
//! dimensionality travels with every row and is checked on every read —
//! a stale dimensionality is an error, never a silent coercion.

pub mod index;
pub mod store;

pub use index::{AcceleratedIndex, ExactScanIndex, VectorIndex};
pub use store::VectorStore;

use crate::error::{MemoryError, Result};

/// Pack an f32 slice as little-endian bytes.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Unpack little-endian bytes into an f32 vector. The byte length must be a
/// multiple of four.
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(MemoryError::Other(format!(
            "vector blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().expect("chunk of 4")))
        .collect())
}

/// Cosine similarity with an explicit zero-vector guard: the similarity of a
/// zero vector against anything is 0, not NaN. Mismatched lengths score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}
