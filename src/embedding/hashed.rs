//! Deterministic offline embedding via signed feature hashing.
//!
//! Tokens are hashed into a fixed number of slots with a sign bit, then
//! the vector is L2-normalized. Texts sharing tokens land close together
//! under cosine similarity, which is enough for air-gapped deployments
//! and for exercising the retrieval stack without a network dependency.
//! The same text always produces the same vector.

use crate::embedding::{EmbeddingError, EmbeddingGenerator, l2_normalize};
use crate::vector::VectorDimension;

const MODEL_VERSION: &str = "feature-hash-v1";

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Local embedding provider with no external dependencies.
pub struct HashedEmbedding {
    dimension: VectorDimension,
}

impl HashedEmbedding {
    /// Creates a hashed embedder producing vectors of `dimension`.
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self { dimension }
    }
}

impl EmbeddingGenerator for HashedEmbedding {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dimension.get()];

        for token in tokenize(text) {
            let hash = fnv1a64(token);
            let slot = (hash % self.dimension.get() as u64) as usize;
            // Top hash bit picks the sign so colliding tokens partially
            // cancel instead of always reinforcing.
            let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
            vector[slot] += sign;
        }

        // Text with no alphanumeric tokens hashes to the zero vector,
        // which normalization rejects.
        l2_normalize(&mut vector)?;
        Ok(vector)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_version(&self) -> &str {
        MODEL_VERSION
    }
}

/// Lowercase alphanumeric tokens of `text`.
fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
}

fn fnv1a64(token: &str) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in token.to_lowercase().bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
