//! Read helpers that return entries without touching the embedder.

use crate::errors::StoreError;
use crate::memory_types::MemoryEntry;

use super::store::{run_blocking, MemoryStore};

impl MemoryStore {
    #[must_use = "handle the error or results may be lost"]
    /// Get a specific memory by ID.
    ///
    /// Returns `None` if the memory doesn't exist.
    pub async fn get(&self, id: i64) -> Result<Option<MemoryEntry>, StoreError> {
        let db = self.db.clone();
        run_blocking(move || db.get(id)).await
    }

    /// Total number of stored memories.
    pub async fn count(&self) -> Result<usize, StoreError> {
        let db = self.db.clone();
        run_blocking(move || db.count()).await
    }

    #[must_use = "handle the error or results may be lost"]
    /// List memories newest first, optionally restricted to one persona.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Limit is 0
    /// - Limit exceeds MAX_SEARCH_LIMIT
    pub async fn list_recent(
        &self,
        limit: usize,
        persona: Option<&str>,
    ) -> Result<Vec<MemoryEntry>, StoreError> {
        let db = self.db.clone();
        let persona = persona.map(str::to_string);
        run_blocking(move || db.list_recent(limit, persona.as_deref())).await
    }
}
