//! Configuration validation logic.

use crate::errors::Error;
use std::path::PathBuf;

/// Validates configuration values.
pub struct ConfigValidator {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,
    /// HuggingFace embedding model identifier.
    pub embedding_model: String,
    /// Largest accepted cosine distance.
    pub relevance_cutoff: f64,
    /// Candidates fetched when filtering by persona.
    pub isolation_overfetch: usize,
    /// Memories injected per prompt.
    pub retrieval_limit: usize,
    /// Default context window.
    pub context_size: u32,
    /// Image generation time bound.
    pub vision_timeout_secs: u64,
    /// Inference server base URL.
    pub engine_url: String,
}

impl ConfigValidator {
    /// Validate all configuration values for correctness and constraints.
    ///
    /// Checks that:
    /// - Relevance cutoff is finite and in (0.0, 2.0]
    /// - Overfetch, retrieval limit, context size, and vision timeout are positive
    /// - Embedding model, database path, and engine URL are not empty
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if any validation check fails.
    pub fn validate(&self) -> Result<(), Error> {
        self.validate_relevance_cutoff()?;
        self.validate_counts()?;
        self.validate_embedding_model()?;
        self.validate_database_path()?;
        self.validate_engine_url()?;

        Ok(())
    }

    fn validate_relevance_cutoff(&self) -> Result<(), Error> {
        if self.relevance_cutoff.is_nan() || self.relevance_cutoff.is_infinite() {
            return Err(Error::Config(
                "Invalid relevance cutoff: NaN and infinity are not allowed".into(),
            ));
        }

        // Cosine distance spans [0, 2].
        if self.relevance_cutoff <= 0.0 || self.relevance_cutoff > 2.0 {
            return Err(Error::Config(format!(
                "Invalid relevance cutoff: {} (must be greater than 0.0 and at most 2.0)",
                self.relevance_cutoff
            )));
        }

        Ok(())
    }

    fn validate_counts(&self) -> Result<(), Error> {
        let positive = [
            ("isolation_overfetch", self.isolation_overfetch as u64),
            ("retrieval_limit", self.retrieval_limit as u64),
            ("context_size", u64::from(self.context_size)),
            ("vision_timeout_secs", self.vision_timeout_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be at least 1")));
            }
        }

        if self.isolation_overfetch > crate::memory::store::MAX_SEARCH_LIMIT {
            return Err(Error::Config(format!(
                "isolation_overfetch {} exceeds maximum {}",
                self.isolation_overfetch,
                crate::memory::store::MAX_SEARCH_LIMIT
            )));
        }

        Ok(())
    }

    fn validate_embedding_model(&self) -> Result<(), Error> {
        if self.embedding_model.trim().is_empty() {
            return Err(Error::Config("Embedding model cannot be empty".to_string()));
        }

        Ok(())
    }

    fn validate_database_path(&self) -> Result<(), Error> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        Ok(())
    }

    fn validate_engine_url(&self) -> Result<(), Error> {
        let url = self.engine_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "Invalid engine URL '{}': must start with http:// or https://",
                self.engine_url
            )));
        }

        Ok(())
    }
}
