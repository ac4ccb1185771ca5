//! Configuration system for ltm-engine.

mod env_parser;
mod loader;
mod overrides;
mod paths;
mod validation;

#[cfg(test)]
mod tests_utils;
#[cfg(test)]
use tests_utils::ENV_MUTEX;

use crate::errors::Error;
use serde::Deserialize;
use std::path::PathBuf;

pub use loader::ConfigFile;

/// Default local inference server.
pub const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:11434";

/// Configuration values with priority: defaults < config file < env vars.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the SQLite database.
    #[serde(default)]
    pub database_path: PathBuf,

    /// HuggingFace embedding model identifier.
    #[serde(default)]
    pub embedding_model: String,

    /// Directory for caching ONNX models.
    #[serde(default)]
    pub model_cache: PathBuf,

    /// Largest cosine distance a retrieved memory may have.
    #[serde(default)]
    pub relevance_cutoff: f64,

    /// Candidates fetched per retrieval when filtering by persona.
    #[serde(default)]
    pub isolation_overfetch: usize,

    /// Memories injected into each prompt.
    #[serde(default)]
    pub retrieval_limit: usize,

    /// Default context window in tokens.
    #[serde(default)]
    pub context_size: u32,

    /// Pause between dropping and recreating a context on the same model.
    #[serde(default)]
    pub settle_delay_ms: u64,

    /// Time bound on generations that carry an image.
    #[serde(default)]
    pub vision_timeout_secs: u64,

    /// Shortest user message (in characters) that is auto-ingested.
    #[serde(default)]
    pub auto_ingest_min_chars: usize,

    /// Base URL of the inference server.
    #[serde(default)]
    pub engine_url: String,
}

impl Default for Config {
    fn default() -> Self {
        // Use home directory with sensible fallback for systems without HOME
        let home = dirs::home_dir().unwrap_or_else(|| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
        });
        let ltm_dir = home.join(".ltm");

        Self {
            database_path: ltm_dir.join("memory.db"),
            embedding_model: crate::embedding::DEFAULT_EMBEDDING_MODEL.to_string(),
            model_cache: ltm_dir.join("models"),
            relevance_cutoff: loader::default_relevance_cutoff(),
            isolation_overfetch: loader::default_isolation_overfetch(),
            retrieval_limit: loader::default_retrieval_limit(),
            context_size: loader::default_context_size(),
            settle_delay_ms: loader::default_settle_delay_ms(),
            vision_timeout_secs: loader::default_vision_timeout_secs(),
            auto_ingest_min_chars: loader::default_auto_ingest_min_chars(),
            engine_url: DEFAULT_ENGINE_URL.to_string(),
        }
    }
}

impl Config {
    /// Load configuration with defaults, file values, and environment overrides.
    pub fn load() -> Result<Self, Error> {
        let file_config = loader::load_from_file()?;
        Self::resolve(file_config)
    }

    /// Load configuration using an explicit config file instead of the default location.
    pub fn load_with_file(path: &std::path::Path) -> Result<Self, Error> {
        let file_config = loader::load_from_path(path)?;
        Self::resolve(file_config)
    }

    fn resolve(file_config: Option<ConfigFile>) -> Result<Self, Error> {
        let mut config = Config::default();

        if let Some(mut file) = file_config {
            paths::expand_tilde(&mut file.database_path);
            paths::expand_tilde(&mut file.model_cache);
            config.merge_from_file(file);
        }

        overrides::apply_env_overrides(&mut config)?;

        config.validate()?;

        Ok(config)
    }

    /// Merge configuration from a file into this config.
    fn merge_from_file(&mut self, file: ConfigFile) {
        if !file.database_path.as_os_str().is_empty() {
            self.database_path = file.database_path;
        }
        if !file.embedding_model.is_empty() {
            self.embedding_model = file.embedding_model;
        }
        if !file.model_cache.as_os_str().is_empty() {
            self.model_cache = file.model_cache;
        }
        if !file.engine_url.is_empty() {
            self.engine_url = file.engine_url;
        }
        self.relevance_cutoff = file.relevance_cutoff;
        self.isolation_overfetch = file.isolation_overfetch;
        self.retrieval_limit = file.retrieval_limit;
        self.context_size = file.context_size;
        self.settle_delay_ms = file.settle_delay_ms;
        self.vision_timeout_secs = file.vision_timeout_secs;
        self.auto_ingest_min_chars = file.auto_ingest_min_chars;
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<(), Error> {
        let validator = validation::ConfigValidator {
            database_path: self.database_path.clone(),
            embedding_model: self.embedding_model.clone(),
            relevance_cutoff: self.relevance_cutoff,
            isolation_overfetch: self.isolation_overfetch,
            retrieval_limit: self.retrieval_limit,
            context_size: self.context_size,
            vision_timeout_secs: self.vision_timeout_secs,
            engine_url: self.engine_url.clone(),
        };

        validator.validate()
    }

    /// Ensure parent directories for database and cache paths exist.
    pub fn ensure_directories(&self) -> Result<(), Error> {
        if let Some(parent) = self.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Config(format!(
                        "Failed to create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        if !self.model_cache.as_os_str().is_empty() {
            std::fs::create_dir_all(&self.model_cache).map_err(|e| {
                Error::Config(format!(
                    "Failed to create model cache directory {}: {e}",
                    self.model_cache.display()
                ))
            })?;
        }

        Ok(())
    }
}
