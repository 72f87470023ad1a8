//! Cosine similarity between embedding vectors.

use lerno_core::{Error, Result};

/// Compute cosine similarity between two vectors, clamped to [0, 1].
///
/// Text embeddings cluster in the positive half-space, so negative
/// similarities are treated as "completely unrelated" and clamped to zero
/// rather than surfaced to callers.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::InvalidInput(format!(
            "Vector dimension mismatch: {} != {}",
            a.len(),
            b.len()
        )));
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();

    let a_norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let b_norm: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if a_norm == 0.0 || b_norm == 0.0 {
        return Ok(0.0);
    }

    Ok((dot_product / (a_norm * b_norm)).clamp(0.0, 1.0))
}
