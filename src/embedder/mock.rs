/// Mock embedder for testing purposes.
///
/// Generates deterministic embeddings from a hash of the image bytes, so
/// tests can run the full build/search pipeline without an ONNX model.
use std::hash::{DefaultHasher, Hash, Hasher};

use super::{Embedder, EmbedderError, l2_normalize};

/// A mock embedder that produces deterministic unit vectors from byte hashes.
///
/// Empty input is rejected with [`EmbedderError::DecodeFailed`], which gives
/// tests a controllable way to exercise per-image failure handling.
pub struct MockEmbedder {
    pub dimensions: usize,
}

impl MockEmbedder {
    /// Create a new `MockEmbedder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimensions: 512 }
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, image: &[u8]) -> Result<Vec<f32>, EmbedderError> {
        if image.is_empty() {
            return Err(EmbedderError::DecodeFailed("empty image".to_string()));
        }

        // Deterministic embedding seeded from the byte hash
        let mut hasher = DefaultHasher::new();
        image.hash(&mut hasher);
        let hash = hasher.finish();

        let bytes = hash.to_le_bytes();
        let mut embedding = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            // Mix the position in so different dimensions differ
            let b = bytes[i % 8] as f32;
            embedding.push((b + (i % 13) as f32) / 255.0);
        }

        l2_normalize(&mut embedding);
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
