//! Error types for the semantic retrieval engine.
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use crate::embedding::EmbeddingError;
use crate::vector::VectorError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for synchronization operations.
///
/// Record-store misses are not errors: `remove` returns `Ok(false)` and
/// position lookups return `None`.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Caller-supplied input rejected before any mutation
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// External embedding service failures
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Vector index and blob codec failures
    #[error("Vector index error: {0}")]
    Index(#[from] VectorError),

    /// Disk write or serialize failures; in-memory state stays at the
    /// pre-operation snapshot
    #[error("Failed to persist state to '{path}': {source}")]
    Persistence {
        path: PathBuf,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to load state from '{path}': {source}")]
    Load {
        path: PathBuf,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl SyncError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::Embedding(_) => "EMBEDDING_ERROR",
            Self::Index(_) => "INDEX_ERROR",
            Self::Persistence { .. } => "PERSISTENCE_ERROR",
            Self::Load { .. } => "LOAD_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Embedding(_) => vec![
                "Check the embedding API key, quota, and network connectivity",
                "Set embedding.fallback_on_error = true to favor availability over fidelity",
            ],
            Self::Persistence { .. } => vec![
                "Check disk space and permissions in the index directory",
                "The in-memory state was not modified; retry the operation",
            ],
            Self::Load { .. } => vec![
                "Check disk permissions in the index directory",
                "Run 'capdex rebuild <category> --source <file>' to regenerate from source records",
            ],
            Self::Config { .. } => vec![
                "Review .capdex/settings.toml",
                "Run 'capdex init --force' to regenerate the default configuration",
            ],
            _ => vec![],
        }
    }
}

impl From<crate::category::ParseCategoryError> for SyncError {
    fn from(error: crate::category::ParseCategoryError) -> Self {
        Self::InvalidInput {
            reason: error.to_string(),
        }
    }
}

/// Result type alias for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;
