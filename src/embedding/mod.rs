//! Embedding generation for semantic retrieval.
//!
//! This module provides the trait and implementations for turning text
//! into unit-length vectors. The production path calls a remote embedding
//! service over HTTP; a deterministic local provider exists for air-gapped
//! operation and tests. Both share the same normalization and validation
//! path, so downstream inner-product search always behaves as cosine
//! similarity.
//!
//! All methods are synchronous; callers in async contexts should wrap
//! calls in `tokio::task::spawn_blocking`.

mod hashed;
mod remote;

use std::sync::Arc;
use thiserror::Error;

use crate::config::Settings;
use crate::vector::VectorDimension;

pub use hashed::HashedEmbedding;
pub use remote::RemoteEmbedding;

/// Errors from embedding providers.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error(
        "Embedding service returned status {status}: {message}\nSuggestion: Check the API key, quota, and service availability"
    )]
    Service { status: u16, message: String },

    #[error(
        "Embedding request timed out after {seconds}s\nSuggestion: Increase embedding.timeout_secs or check network connectivity"
    )]
    Timeout { seconds: u64 },

    #[error(
        "Embedding request failed: {reason}\nSuggestion: Check network connectivity and the configured api_base"
    )]
    Request { reason: String },

    #[error(
        "Malformed embedding response: {reason}\nSuggestion: Verify the configured model name and API version"
    )]
    MalformedResponse { reason: String },

    #[error(
        "Embedding dimension mismatch: expected {expected}, got {actual}\nSuggestion: Align embedding.dimension with the model's output size"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(
        "Embedding produced an unusable vector: {reason}\nSuggestion: Check the input text and the embedding service output"
    )]
    InvalidVector { reason: &'static str },

    #[error(
        "Embedding provider misconfigured: {reason}\nSuggestion: Review the [embedding] section of settings.toml"
    )]
    Configuration { reason: String },
}

/// Trait for generating embeddings from text.
///
/// Implementations must be thread-safe and must return unit-length
/// vectors of their declared dimension. Input text is guaranteed
/// non-empty by the synchronization layer.
pub trait EmbeddingGenerator: Send + Sync {
    /// Generate a normalized embedding for one text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Get the dimension of embeddings produced by this generator.
    #[must_use]
    fn dimension(&self) -> VectorDimension;

    /// Identifier of the model producing the vectors, recorded per vector
    /// for future migration.
    #[must_use]
    fn model_version(&self) -> &str;
}

/// Builds the configured embedding provider.
///
/// `embedding.provider` selects `"remote"` (HTTP service) or `"hashed"`
/// (deterministic local hashing).
pub fn create_generator(
    settings: &Settings,
) -> Result<Arc<dyn EmbeddingGenerator>, EmbeddingError> {
    match settings.embedding.provider.as_str() {
        "remote" => Ok(Arc::new(RemoteEmbedding::new(&settings.embedding)?)),
        "hashed" => {
            let dimension = VectorDimension::new(settings.embedding.dimension)
                .map_err(|e| EmbeddingError::Configuration {
                    reason: e.to_string(),
                })?;
            Ok(Arc::new(HashedEmbedding::new(dimension)))
        }
        other => Err(EmbeddingError::Configuration {
            reason: format!("unknown embedding provider '{other}', expected 'remote' or 'hashed'"),
        }),
    }
}

/// Scales a vector to unit length in place.
///
/// Fails for zero-norm or non-finite input rather than emitting a vector
/// that would corrupt cosine ranking.
pub fn l2_normalize(vector: &mut [f32]) -> Result<(), EmbeddingError> {
    let norm_sq: f32 = vector.iter().map(|x| x * x).sum();
    if !norm_sq.is_finite() {
        return Err(EmbeddingError::InvalidVector {
            reason: "vector contains non-finite values",
        });
    }
    let norm = norm_sq.sqrt();
    if norm <= f32::EPSILON {
        return Err(EmbeddingError::InvalidVector {
            reason: "vector has zero norm and cannot be normalized",
        });
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
    Ok(())
}

/// Draws a normalized random vector.
///
/// Used only by the opt-in fallback policy when the embedding service is
/// unavailable. Components are uniform in [0, 1) before normalization,
/// matching the degraded behavior this replaces.
#[must_use]
pub fn random_unit_vector(dimension: VectorDimension) -> Vec<f32> {
    use rand::Rng;

    let mut rng = rand::rng();
    let mut vector: Vec<f32> = (0..dimension.get()).map(|_| rng.random::<f32>()).collect();
    if l2_normalize(&mut vector).is_err() {
        // An all-zero draw cannot be normalized; use a constant direction.
        let fill = 1.0 / (dimension.get() as f32).sqrt();
        vector.iter_mut().for_each(|v| *v = fill);
    }
    vector
}
