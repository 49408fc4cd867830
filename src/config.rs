//! Configuration module for the semantic retrieval engine.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `CAPDEX_` and use double
//! underscores to separate nested levels:
//! - `CAPDEX_EMBEDDING__DIMENSION=768` sets `embedding.dimension`
//! - `CAPDEX_EMBEDDING__FALLBACK_ON_ERROR=true` sets `embedding.fallback_on_error`
//! - `CAPDEX_SEARCH__DEFAULT_LIMIT=10` sets `search.default_limit`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Path to the index directory
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Stored record text is truncated to this many characters
    #[serde(default = "default_max_stored_text")]
    pub max_stored_text: usize,

    /// Embedding provider settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Search defaults
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// Provider: "remote" (HTTP service) or "hashed" (deterministic, offline)
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Embedding model identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector dimension produced by the model
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Base URL of the embedding API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// API key; falls back to the GEMINI_API_KEY environment variable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Substitute a normalized random vector when the service fails
    /// instead of surfacing the error
    #[serde(default = "default_false")]
    pub fallback_on_error: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    /// Default number of results per search
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,

    /// Default similarity threshold; results scoring below are dropped,
    /// an exactly equal score passes
    #[serde(default = "default_search_threshold")]
    pub default_threshold: f32,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(".capdex/index")
}
fn default_false() -> bool {
    false
}
fn default_max_stored_text() -> usize {
    1000
}
fn default_embedding_provider() -> String {
    "remote".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-004".to_string()
}
fn default_dimension() -> usize {
    768
}
fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_search_limit() -> usize {
    5
}
fn default_search_threshold() -> f32 {
    0.5
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            debug: false,
            max_stored_text: default_max_stored_text(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            api_base: default_api_base(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            fallback_on_error: false,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
            default_threshold: default_search_threshold(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .capdex directory
        let config_path =
            Self::find_workspace_config().unwrap_or_else(|| PathBuf::from(".capdex/settings.toml"));

        Self::figment_for(config_path).extract().map_err(Box::new)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment_for(path.as_ref().to_path_buf())
            .extract()
            .map_err(Box::new)
    }

    fn figment_for(config_path: PathBuf) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Layer in environment variables with CAPDEX_ prefix
            // Use double underscore (__) to separate nested levels
            // Single underscore (_) remains as is within field names
            .merge(Env::prefixed("CAPDEX_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".") // Double underscore becomes dot
                    .into()
            }))
    }

    /// Find the workspace config by looking for a .capdex directory,
    /// searching from the current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(".capdex");
            if config_dir.exists() && config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }

        None
    }

    /// Check if configuration is properly initialized
    pub fn check_init() -> Result<(), String> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(".capdex/settings.toml"));

        if !config_path.exists() {
            return Err("No configuration file found".to_string());
        }

        match std::fs::read_to_string(&config_path) {
            Ok(content) => {
                if let Err(e) = toml::from_str::<Settings>(&content) {
                    return Err(format!(
                        "Configuration file is corrupted: {e}\nRun 'capdex init --force' to regenerate."
                    ));
                }
            }
            Err(e) => {
                return Err(format!("Cannot read configuration file: {e}"));
            }
        }

        Ok(())
    }

    /// Save current configuration to file
    pub fn save(
        &self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(".capdex/settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&config_path, CONFIG_TEMPLATE)?;

        if force {
            println!("Overwrote configuration at: {}", config_path.display());
        } else {
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
        }

        Ok(config_path)
    }
}

/// Commented settings file written by `capdex init`
const CONFIG_TEMPLATE: &str = r#"# Capdex Configuration File

# Version of the configuration schema
version = 1

# Path to the index directory (relative to where capdex runs)
index_path = ".capdex/index"

# Global debug mode
debug = false

# Stored record text is truncated to this many characters
max_stored_text = 1000

[embedding]
# Embedding provider: "remote" (HTTP service) or "hashed" (deterministic, offline)
provider = "remote"

# Embedding model identifier
model = "text-embedding-004"

# Vector dimension produced by the model
dimension = 768

# Base URL of the embedding API
api_base = "https://generativelanguage.googleapis.com/v1beta"

# API key for the embedding service
# Falls back to the GEMINI_API_KEY environment variable when unset
# api_key = ""

# Request timeout in seconds
timeout_secs = 10

# Substitute a normalized random vector when the embedding service fails.
# The default surfaces the error instead; enable only when availability
# matters more than retrieval fidelity.
fallback_on_error = false

[search]
# Default number of results per search
default_limit = 5

# Default similarity threshold (0.0 to 1.0)
# Results scoring below the threshold are dropped; an equal score passes
default_threshold = 0.5
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.index_path, PathBuf::from(".capdex/index"));
        assert_eq!(settings.max_stored_text, 1000);
        assert_eq!(settings.embedding.provider, "remote");
        assert_eq!(settings.embedding.dimension, 768);
        assert_eq!(settings.search.default_limit, 5);
        assert!(!settings.embedding.fallback_on_error);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2
max_stored_text = 500

[embedding]
provider = "hashed"
dimension = 64
fallback_on_error = true

[search]
default_threshold = 0.3
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(settings.max_stored_text, 500);
        assert_eq!(settings.embedding.provider, "hashed");
        assert_eq!(settings.embedding.dimension, 64);
        assert!(settings.embedding.fallback_on_error);
        assert_eq!(settings.search.default_threshold, 0.3);
        // Untouched fields keep their defaults
        assert_eq!(settings.search.default_limit, 5);
        assert_eq!(settings.embedding.model, "text-embedding-004");
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let mut settings = Settings::default();
        settings.embedding.provider = "hashed".to_string();
        settings.search.default_limit = 10;

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.embedding.provider, "hashed");
        assert_eq!(loaded.search.default_limit, 10);
    }

    #[test]
    fn test_partial_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        // Only one field set; everything else must default
        fs::write(&config_path, "debug = true\n").unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert!(settings.debug);
        assert_eq!(settings.embedding.dimension, 768);
        assert_eq!(settings.index_path, PathBuf::from(".capdex/index"));
    }

    #[test]
    fn test_init_template_parses() {
        // The commented template must stay in sync with the Settings schema.
        let parsed: Settings = toml::from_str(CONFIG_TEMPLATE).unwrap();
        let defaults = Settings::default();
        assert_eq!(parsed.version, defaults.version);
        assert_eq!(parsed.index_path, defaults.index_path);
        assert_eq!(parsed.embedding.provider, defaults.embedding.provider);
        assert_eq!(parsed.embedding.dimension, defaults.embedding.dimension);
        assert_eq!(parsed.search.default_limit, defaults.search.default_limit);
    }
}
