//! Embedding generation boundary.
//!
//! The engine never runs an embedding model itself. Callers plug in an
//! [`EmbeddingGenerator`] (for example a CLIP ViT-B-32 service that embeds
//! thumbnails and query text into the same 512-dimensional space) and the
//! search service uses it for `search_text` and `upsert_with`.

use sha2::{Digest, Sha256};

use crate::vector::{VectorDimension, VectorError, normalize_vector};

/// Raw content to embed.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedInput {
    /// Free-text query.
    Text(String),
    /// Encoded image bytes (a thumbnail or sampled video frame).
    Frame(Vec<u8>),
}

/// Trait for generating embeddings.
pub trait EmbeddingGenerator: Send + Sync {
    /// Embeds one input into a vector of `dimension()` components.
    fn embed(&self, input: &EmbedInput) -> Result<Vec<f32>, VectorError>;

    /// Get the dimension of embeddings produced by this generator.
    fn dimension(&self) -> VectorDimension;

    /// Embeds several inputs; the default calls `embed` for each.
    fn embed_batch(&self, inputs: &[EmbedInput]) -> Result<Vec<Vec<f32>>, VectorError> {
        inputs.iter().map(|input| self.embed(input)).collect()
    }
}

/// Deterministic generator based on feature hashing.
///
/// Text is split into lowercase words and every word adds weight to a
/// dimension chosen by its SHA-256 hash, so texts sharing words land close
/// together. Frames hash fixed-size byte chunks the same way. Useful for
/// tests and offline demos; it carries no visual semantics.
#[derive(Debug, Clone)]
pub struct MockEmbeddingGenerator {
    dimension: VectorDimension,
}

impl Default for MockEmbeddingGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbeddingGenerator {
    /// Create a new mock generator with the standard 512 dimensions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dimension: VectorDimension::dimension_512(),
        }
    }

    /// Create a generator with custom dimension for testing.
    #[must_use]
    pub fn with_dimension(dimension: VectorDimension) -> Self {
        Self { dimension }
    }

    fn bucket(&self, feature: &[u8]) -> (usize, f32) {
        let digest = Sha256::digest(feature);
        let mut index = [0u8; 8];
        index.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(index) % self.dimension.get() as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }
}

impl EmbeddingGenerator for MockEmbeddingGenerator {
    fn embed(&self, input: &EmbedInput) -> Result<Vec<f32>, VectorError> {
        let mut embedding = vec![0.0; self.dimension.get()];

        match input {
            EmbedInput::Text(text) => {
                let words: Vec<String> = text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                    .map(str::to_lowercase)
                    .collect();
                if words.is_empty() {
                    return Err(VectorError::EmbeddingFailed(
                        "cannot embed empty text".to_string(),
                    ));
                }
                for word in &words {
                    let (bucket, sign) = self.bucket(word.as_bytes());
                    embedding[bucket] += sign;
                }
            }
            EmbedInput::Frame(bytes) => {
                if bytes.is_empty() {
                    return Err(VectorError::EmbeddingFailed(
                        "cannot embed an empty frame".to_string(),
                    ));
                }
                for chunk in bytes.chunks(16) {
                    let (bucket, sign) = self.bucket(chunk);
                    embedding[bucket] += sign;
                }
            }
        }

        normalize_vector(&mut embedding);
        Ok(embedding)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{DEFAULT_VECTOR_DIMENSION, cosine_similarity};

    fn text(s: &str) -> EmbedInput {
        EmbedInput::Text(s.to_string())
    }

    #[test]
    fn test_mock_generator_dimension_and_norm() {
        let generator = MockEmbeddingGenerator::new();
        let embedding = generator.embed(&text("sunset over the ocean")).unwrap();

        assert_eq!(embedding.len(), DEFAULT_VECTOR_DIMENSION);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_mock_generator_is_deterministic() {
        let generator = MockEmbeddingGenerator::new();
        let a = generator.embed(&text("Cat videos")).unwrap();
        let b = generator.embed(&text("cat   VIDEOS")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_shared_words_are_closer() {
        let generator = MockEmbeddingGenerator::new();
        let query = generator.embed(&text("mountain bike downhill")).unwrap();
        let related = generator.embed(&text("downhill mountain bike race")).unwrap();
        let unrelated = generator.embed(&text("chocolate cake recipe")).unwrap();

        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_frames_and_batches() {
        let generator = MockEmbeddingGenerator::with_dimension(VectorDimension::new(32).unwrap());
        let frame = EmbedInput::Frame((0u8..=255).collect());
        let batch = generator.embed_batch(&[frame.clone(), text("hello")]).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], generator.embed(&frame).unwrap());
        assert_eq!(generator.dimension().get(), 32);
    }

    #[test]
    fn test_empty_input_fails() {
        let generator = MockEmbeddingGenerator::new();
        assert!(matches!(
            generator.embed(&text("  ... ")),
            Err(VectorError::EmbeddingFailed(_))
        ));
        assert!(generator.embed(&EmbedInput::Frame(Vec::new())).is_err());
    }
}
