//! Embedding-backed semantic retrieval for capability maps.
//!
//! Capdex turns text records describing organizational capabilities,
//! goals, and recommendations into vectors, stores them in per-category
//! similarity indexes, keeps a durable record of where each vector lives,
//! and answers nearest-neighbor queries over them.
//!
//! The index is append-only: removal deletes only the bookkeeping record,
//! and the space is reclaimed by rebuilding a category from its
//! authoritative source. Every mutation persists before it becomes
//! visible to readers.

pub mod category;
pub mod config;
pub mod embedding;
pub mod error;
pub mod storage;
pub mod store;
pub mod sync;
pub mod vector;

// Explicit exports for better API clarity
pub use category::{Category, ParseCategoryError};
pub use config::Settings;
pub use embedding::{EmbeddingError, EmbeddingGenerator, create_generator};
pub use error::{SyncError, SyncResult};
pub use store::VectorRecord;
pub use sync::{CategoryStats, SearchHit, StatsReport, VectorSyncManager};
pub use vector::{FlatIndex, IndexPosition, Score, VectorDimension};
