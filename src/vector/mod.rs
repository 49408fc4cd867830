//! Per-category vector indexing.
//!
//! One append-only flat index per content category, searched by exact
//! inner product. Vectors are unit-length, so inner product equals cosine
//! similarity. The index never deletes: removal is emulated by the
//! synchronization layer through full category rebuilds.

mod flat;
mod types;

// Re-export core types for public API
pub use flat::FlatIndex;
pub use types::{IndexPosition, Score, VECTOR_DIMENSION_768, VectorDimension, VectorError};
