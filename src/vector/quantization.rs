//! 8-bit scalar quantization for inverted-list storage.
//!
//! Each vector is mapped to one byte per dimension using its own min/max
//! range. Scores computed against codes are approximate; the query engine
//! re-ranks the best quantized candidates with exact vectors.

use serde::{Deserialize, Serialize};

use crate::vector::metric::Metric;

/// How vectors are stored inside inverted lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quantization {
    /// Full-precision f32 vectors.
    #[default]
    None,
    /// One byte per dimension with per-vector scaling.
    Sq8,
}

/// A vector encoded with 8-bit scalar quantization.
///
/// The original value is approximately `code * scale + min`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sq8Code {
    pub data: Vec<u8>,
    pub min: f32,
    pub scale: f32,
}

impl Sq8Code {
    /// Encodes an f32 vector.
    #[must_use]
    pub fn encode(vector: &[f32]) -> Self {
        let min = vector.iter().copied().fold(f32::INFINITY, f32::min);
        let max = vector.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let range = max - min;

        if vector.is_empty() || range < f32::EPSILON {
            return Self {
                data: vec![0; vector.len()],
                min: if vector.is_empty() { 0.0 } else { min },
                scale: 0.0,
            };
        }

        let inv = 255.0 / range;
        // Clamped to [0, 255] before the cast
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let data = vector
            .iter()
            .map(|&v| ((v - min) * inv).round().clamp(0.0, 255.0) as u8)
            .collect();

        Self {
            data,
            min,
            scale: range / 255.0,
        }
    }

    /// Reconstructs an approximation of the original vector.
    #[must_use]
    pub fn decode(&self) -> Vec<f32> {
        self.data
            .iter()
            .map(|&c| f32::from(c) * self.scale + self.min)
            .collect()
    }

    /// Approximate score of this code against a full-precision query.
    pub fn score(&self, query: &[f32], metric: Metric) -> f32 {
        debug_assert_eq!(query.len(), self.data.len());
        match metric {
            Metric::Cosine => {
                // sum(q * (c*s + m)) = s * sum(q*c) + m * sum(q)
                let mut dot_codes = 0.0f32;
                let mut sum_query = 0.0f32;
                for (&q, &c) in query.iter().zip(self.data.iter()) {
                    dot_codes += q * f32::from(c);
                    sum_query += q;
                }
                self.scale * dot_codes + self.min * sum_query
            }
            Metric::L2 => {
                let distance: f32 = query
                    .iter()
                    .zip(self.data.iter())
                    .map(|(&q, &c)| {
                        let d = q - (f32::from(c) * self.scale + self.min);
                        d * d
                    })
                    .sum();
                crate::vector::metric::l2_to_score(distance)
            }
        }
    }

    /// Heap bytes used by the code.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        self.data.len() + 2 * std::mem::size_of::<f32>()
    }
}
