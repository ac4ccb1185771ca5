//! Configuration file loading and parsing.

use crate::errors::Error;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Configuration loaded from TOML file.
#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub database_path: PathBuf,

    #[serde(default)]
    pub embedding_model: String,

    #[serde(default)]
    pub model_cache: PathBuf,

    #[serde(default = "default_relevance_cutoff")]
    pub relevance_cutoff: f64,

    #[serde(default = "default_isolation_overfetch")]
    pub isolation_overfetch: usize,

    #[serde(default = "default_retrieval_limit")]
    pub retrieval_limit: usize,

    #[serde(default = "default_context_size")]
    pub context_size: u32,

    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_vision_timeout_secs")]
    pub vision_timeout_secs: u64,

    #[serde(default = "default_auto_ingest_min_chars")]
    pub auto_ingest_min_chars: usize,

    #[serde(default)]
    pub engine_url: String,
}

pub(super) fn default_relevance_cutoff() -> f64 {
    0.75
}

pub(super) fn default_isolation_overfetch() -> usize {
    15
}

pub(super) fn default_retrieval_limit() -> usize {
    5
}

pub(super) fn default_context_size() -> u32 {
    4096
}

pub(super) fn default_settle_delay_ms() -> u64 {
    200
}

pub(super) fn default_vision_timeout_secs() -> u64 {
    30
}

pub(super) fn default_auto_ingest_min_chars() -> usize {
    20
}

/// Load configuration from the TOML file in the user's config directory.
pub fn load_from_file() -> Result<Option<ConfigFile>, Error> {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let config_dir = dirs::config_dir().unwrap_or_else(|| home.join(".config"));

    load_from_path(&config_dir.join("ltm/config.toml"))
}

/// Load configuration from `config_path`, or `None` if it does not exist.
pub fn load_from_path(config_path: &Path) -> Result<Option<ConfigFile>, Error> {
    if !config_path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(config_path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file {}: {e}",
            config_path.display()
        ))
    })?;

    let config: ConfigFile = toml::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file {}: {e}",
            config_path.display()
        ))
    })?;

    Ok(Some(config))
}
