//! Core memory store struct combining embedding generation and persistence.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::errors::{Error, StoreError};
use crate::sqlite::Database;

/// Maximum allowed input length (100,000 bytes).
pub const MAX_INPUT_LENGTH: usize = 100_000;
/// Maximum allowed limit for search operations.
pub const MAX_SEARCH_LIMIT: usize = 10_000;

/// Retrieval tuning shared by every `retrieve` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalSettings {
    /// Candidates at or beyond this cosine distance are discarded.
    pub relevance_cutoff: f64,
    /// Minimum k-NN fetch size when persona isolation is on, so filtering
    /// still leaves enough candidates.
    pub isolation_overfetch: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            relevance_cutoff: 0.75,
            isolation_overfetch: 15,
        }
    }
}

impl From<&Config> for RetrievalSettings {
    fn from(config: &Config) -> Self {
        Self {
            relevance_cutoff: config.relevance_cutoff,
            isolation_overfetch: config.isolation_overfetch,
        }
    }
}

/// Persona-aware vector memory store.
///
/// Cheap to clone; clones share the database and embedder. Embedding and SQLite
/// work runs on the blocking thread pool so async callers are never stalled.
#[derive(Clone)]
pub struct MemoryStore {
    pub(crate) db: Arc<Database>,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) settings: RetrievalSettings,
}

impl MemoryStore {
    /// Open the store at `db_path`, creating or migrating the schema as needed.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Database path contains path traversal sequences (e.g., "../")
    /// - Parent directory cannot be canonicalized
    /// - Database cannot be opened
    pub fn open(
        db_path: &Path,
        embedder: Arc<dyn Embedder>,
        settings: RetrievalSettings,
    ) -> Result<Self, Error> {
        use std::path::Component;

        for component in db_path.components() {
            if matches!(component, Component::ParentDir) {
                return Err(Error::Config(
                    "Invalid database path: contains '..' which may escape the intended directory".to_string(),
                ));
            }
        }

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::canonicalize(parent).map_err(|e| {
                    Error::Config(format!(
                        "Invalid database path: parent directory not accessible: {}",
                        e
                    ))
                })?;
            }
        }

        let db = Database::open(db_path)?;
        Ok(Self::with_database(db, embedder, settings))
    }

    /// Wrap an already opened database.
    pub fn with_database(
        db: Database,
        embedder: Arc<dyn Embedder>,
        settings: RetrievalSettings,
    ) -> Self {
        MemoryStore {
            db: Arc::new(db),
            embedder,
            settings,
        }
    }

    pub fn settings(&self) -> RetrievalSettings {
        self.settings
    }
}

/// Rejection reasons shared by ingest and retrieve input checks.
pub(crate) enum InputCheck {
    Empty,
    TooLong(usize),
}

/// Validate input length (rejects empty and whitespace-only inputs).
pub(crate) fn check_input(text: &str) -> Result<(), InputCheck> {
    if text.trim().is_empty() {
        return Err(InputCheck::Empty);
    }
    if text.len() > MAX_INPUT_LENGTH {
        return Err(InputCheck::TooLong(text.len()));
    }
    Ok(())
}

/// Run blocking store work off the async runtime.
pub(crate) async fn run_blocking<T, E, F>(work: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<StoreError> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(join_err) => Err(StoreError::Worker(join_err.to_string()).into()),
    }
}
