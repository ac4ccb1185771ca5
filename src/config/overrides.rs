//! Environment variable overrides for configuration.

use crate::errors::Error;

use super::env_parser::{apply_number_override, apply_path_override, apply_string_override};
use super::Config;

#[cfg(test)]
use super::tests_utils::{cleanup_env_vars, ENV_MUTEX};

/// Every environment variable consulted, in application order.
#[cfg(test)]
pub(super) const ENV_VARS: &[&str] = &[
    "LTM_DATABASE_PATH",
    "LTM_EMBEDDING_MODEL",
    "LTM_MODEL_CACHE",
    "LTM_RELEVANCE_CUTOFF",
    "LTM_ISOLATION_OVERFETCH",
    "LTM_RETRIEVAL_LIMIT",
    "LTM_CONTEXT_SIZE",
    "LTM_SETTLE_DELAY_MS",
    "LTM_VISION_TIMEOUT_SECS",
    "LTM_AUTO_INGEST_MIN_CHARS",
    "LTM_ENGINE_URL",
];

/// Apply environment variable overrides to configuration.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), Error> {
    apply_path_override("LTM_DATABASE_PATH", &mut config.database_path)?;
    apply_string_override("LTM_EMBEDDING_MODEL", &mut config.embedding_model)?;
    apply_path_override("LTM_MODEL_CACHE", &mut config.model_cache)?;
    apply_number_override("LTM_RELEVANCE_CUTOFF", &mut config.relevance_cutoff)?;
    apply_number_override("LTM_ISOLATION_OVERFETCH", &mut config.isolation_overfetch)?;
    apply_number_override("LTM_RETRIEVAL_LIMIT", &mut config.retrieval_limit)?;
    apply_number_override("LTM_CONTEXT_SIZE", &mut config.context_size)?;
    apply_number_override("LTM_SETTLE_DELAY_MS", &mut config.settle_delay_ms)?;
    apply_number_override("LTM_VISION_TIMEOUT_SECS", &mut config.vision_timeout_secs)?;
    apply_number_override("LTM_AUTO_INGEST_MIN_CHARS", &mut config.auto_ingest_min_chars)?;
    apply_string_override("LTM_ENGINE_URL", &mut config.engine_url)?;
    Ok(())
}
