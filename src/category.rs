//! Content categories and per-category dispatch.
//!
//! Every vector lives in exactly one category. Categories are a closed
//! enumeration rather than freeform strings so unknown names are rejected
//! at the API edge and per-category state can live in a fixed lookup table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Partitions of the vector space, one per kind of source entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Capability,
    Goal,
    Recommendation,
}

impl Category {
    /// All categories in declaration order. Drives per-category loops and
    /// indexes the manager's state table, so the order must stay stable.
    pub const ALL: [Category; 3] = [
        Category::Capability,
        Category::Goal,
        Category::Recommendation,
    ];

    /// Stable lowercase name used in file names, config, and the CLI.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Category::Capability => "capability",
            Category::Goal => "goal",
            Category::Recommendation => "recommendation",
        }
    }

    /// Position of this category in [`Category::ALL`].
    #[must_use]
    pub const fn ordinal(&self) -> usize {
        match self {
            Category::Capability => 0,
            Category::Goal => 1,
            Category::Recommendation => 2,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unrecognized category names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown category '{0}'. Expected one of: capability, goal, recommendation")]
pub struct ParseCategoryError(pub String);

impl FromStr for Category {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "capability" => Ok(Category::Capability),
            "goal" => Ok(Category::Goal),
            "recommendation" => Ok(Category::Recommendation),
            other => Err(ParseCategoryError(other.to_string())),
        }
    }
}
