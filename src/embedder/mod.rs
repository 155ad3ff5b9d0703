/// Embedder trait and shared types for image embedding.
///
/// The rest of the crate only depends on this contract: bytes in, a
/// fixed-dimension L2-normalized vector out.
pub mod clip;
pub mod download;
pub mod mock;

use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("image decode failed: {0}")]
    DecodeFailed(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),
}

/// Trait for image embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
pub trait Embedder: Send + Sync {
    /// Embed raw image bytes into a vector.
    ///
    /// Implementations should return unit-length vectors, but callers
    /// normalize on receipt rather than rely on it.
    fn embed(&self, image: &[u8]) -> Result<Vec<f32>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// L2-normalize a vector in place. A zero vector is left untouched.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm_sq: f32 = vec.iter().map(|v| v * v).sum();
    if norm_sq == 0.0 {
        return;
    }
    let inv_norm = 1.0 / norm_sq.sqrt();
    for v in vec {
        *v *= inv_norm;
    }
}
