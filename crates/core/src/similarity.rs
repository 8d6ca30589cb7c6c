//! Vector similarity.
//!
//! Accumulates in `f64` so that `cosine_similarity(v, v)` lands within
//! 1e-9 of 1.0 for `f32` embeddings of any realistic dimensionality.

use crate::error::SimilarityError;

/// Cosine similarity between two equal-length vectors.
///
/// Returns 0.0 when either vector has zero magnitude. Vectors of different
/// lengths are rejected rather than truncated. The result is not clamped, so
/// rounding may push it marginally outside [-1, 1].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Scale a vector to unit length in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x = (*x as f64 / norm) as f32;
        }
    }
}

/// Rank candidates by similarity to `query`, best first, keeping at most
/// `top_k` entries at or above `threshold`.
///
/// Returns `(index, similarity)` pairs; ties keep input order.
pub fn rank_by_similarity<'a, I>(
    query: &[f32],
    candidates: I,
    top_k: usize,
    threshold: f64,
) -> Result<Vec<(usize, f64)>, SimilarityError>
where
    I: IntoIterator<Item = (usize, &'a [f32])>,
{
    let mut scored = Vec::new();
    for (idx, vector) in candidates {
        let score = cosine_similarity(query, vector)?;
        if score >= threshold {
            scored.push((idx, score));
        }
    }

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    Ok(scored)
}
