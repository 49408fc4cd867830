//! Type-safe wrappers and error types for vector index operations.
//!
//! Newtypes here prevent positions, scores, and dimensions from being
//! confused with bare integers and floats at call sites.

use thiserror::Error;

/// Dimension of the remote embedding model used in production.
pub const VECTOR_DIMENSION_768: usize = 768;

/// Append-order slot of a vector inside one category's index.
///
/// Position 0 is the first vector ever added, so this wraps a plain u32
/// rather than `NonZeroU32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct IndexPosition(u32);

impl IndexPosition {
    /// Creates a new `IndexPosition`.
    #[must_use]
    pub const fn new(position: u32) -> Self {
        Self(position)
    }

    /// Returns the underlying u32 value.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Returns the position as a usize for slice indexing.
    #[must_use]
    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for IndexPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-safe wrapper for similarity scores.
///
/// Scores are inner products of unit-length vectors, so valid values lie
/// in [-1.0, 1.0] where 1.0 indicates identical direction.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Score(f32);

impl Score {
    /// Creates a new `Score` with validation.
    ///
    /// Returns an error if the value is outside [-1.0, 1.0] or not finite.
    pub fn new(value: f32) -> Result<Self, VectorError> {
        if !value.is_finite() {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score must be a finite number",
            });
        }
        if !(-1.0..=1.0).contains(&value) {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score must be in range [-1.0, 1.0]",
            });
        }
        Ok(Self(value))
    }

    /// Creates a score from a raw inner product, clamping float drift.
    ///
    /// Dot products of normalized vectors can land a few ULPs outside
    /// [-1, 1]; those are clamped rather than rejected. Non-finite input
    /// is still an error.
    pub fn from_inner_product(value: f32) -> Result<Self, VectorError> {
        if !value.is_finite() {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Inner product must be a finite number",
            });
        }
        Ok(Self(value.clamp(-1.0, 1.0)))
    }

    /// Creates a score of 1.0 (identical direction).
    #[must_use]
    pub const fn one() -> Self {
        Self(1.0)
    }

    /// Returns the underlying f32 value.
    #[must_use]
    pub fn get(&self) -> f32 {
        self.0
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Type-safe wrapper for vector dimensions.
///
/// Validated at construction so dimension mismatches surface before any
/// vector math runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// Creates the production 768-dimensional vector dimension.
    #[must_use]
    pub const fn dimension_768() -> Self {
        Self(VECTOR_DIMENSION_768)
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Errors that can occur during vector index operations.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model and configured dimension"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error("Invalid score value: {value}\nReason: {reason}")]
    InvalidScore { value: f32, reason: &'static str },

    #[error(
        "Index is full: maximum vector count reached\nSuggestion: Rebuild the category to reclaim orphaned positions"
    )]
    PositionExhausted,

    #[error("Storage error: {0}\nSuggestion: Check disk space and file permissions")]
    Storage(#[from] std::io::Error),

    #[error(
        "Invalid index format: {reason}\nSuggestion: The file may be truncated or corrupted; rebuild the category from source records"
    )]
    InvalidFormat { reason: String },

    #[error(
        "Invalid index version: expected {expected}, got {actual}\nSuggestion: Migrate the index format or rebuild the category"
    )]
    VersionMismatch { expected: u32, actual: u32 },
}
