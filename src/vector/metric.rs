//! Similarity metrics.
//!
//! Every metric is exposed as a score where higher means more similar, so the
//! index, the delta scan and the merge step can share one ordering.

use serde::{Deserialize, Serialize};

use crate::vector::types::VectorError;

/// Similarity metric for a corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity. Vectors are normalized on write, so scoring is a dot product.
    #[default]
    Cosine,
    /// Squared euclidean distance mapped to `1 / (1 + d)`.
    L2,
}

impl Metric {
    /// Scores `candidate` against `query`.
    ///
    /// For `Cosine` both vectors are expected to be unit length already.
    #[inline]
    pub fn score(&self, query: &[f32], candidate: &[f32]) -> f32 {
        match self {
            Metric::Cosine => dot_product(query, candidate),
            Metric::L2 => l2_to_score(squared_l2(query, candidate)),
        }
    }

    /// Whether vectors must be L2-normalized before storage and search.
    #[must_use]
    pub fn normalizes(&self) -> bool {
        matches!(self, Metric::Cosine)
    }

    /// Applies the metric's normalization policy in place.
    ///
    /// Under cosine a vector without direction cannot be normalized and is
    /// rejected. `vector` must already hold only finite components.
    pub fn prepare(&self, vector: &mut [f32]) -> Result<(), VectorError> {
        if self.normalizes() && !normalize_vector(vector) {
            return Err(VectorError::InvalidVector {
                reason: "a zero vector has no direction under the cosine metric".to_string(),
            });
        }
        Ok(())
    }

    /// Stable tag used in the on-disk store header.
    #[must_use]
    pub fn tag(&self) -> u32 {
        match self {
            Metric::Cosine => 1,
            Metric::L2 => 2,
        }
    }

    /// Inverse of [`Metric::tag`].
    #[must_use]
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(Metric::Cosine),
            2 => Some(Metric::L2),
            _ => None,
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::Cosine => f.write_str("cosine"),
            Metric::L2 => f.write_str("l2"),
        }
    }
}

/// Dot product of two equal-length vectors.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Squared euclidean distance.
#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Maps a squared L2 distance to a similarity in `(0, 1]`.
#[inline]
pub fn l2_to_score(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}

/// Computes cosine similarity between two vectors of arbitrary length.
///
/// Returns 0.0 when either vector has zero length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Normalizes a vector in-place to unit length.
///
/// The norm is accumulated in `f64`, which cannot overflow or underflow for
/// finite `f32` input. Zero vectors are left untouched and reported with
/// `false`.
pub fn normalize_vector(vector: &mut [f32]) -> bool {
    let norm = vector
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return false;
    }
    for value in vector.iter_mut() {
        *value = (f64::from(*value) / norm) as f32;
    }
    true
}

/// Creates a normalized copy of a vector.
pub fn normalize_vector_copy(vector: &[f32]) -> Vec<f32> {
    let mut normalized = vector.to_vec();
    normalize_vector(&mut normalized);
    normalized
}
