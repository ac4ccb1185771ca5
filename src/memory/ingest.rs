//! Write path: ingest and clear.

use crate::errors::{IngestError, StoreError};
use crate::memory_types::{normalize_persona, normalize_tags};
use crate::sqlite::PairInsertError;

use super::store::{check_input, run_blocking, InputCheck, MemoryStore, MAX_INPUT_LENGTH};

impl MemoryStore {
    #[must_use = "handle the error or the memory may silently not be stored"]
    /// Store a memory and its embedding.
    ///
    /// The embedding is computed before anything is written, so an embedding
    /// failure leaves the store untouched. The entry and its vector are then
    /// inserted in one transaction.
    ///
    /// # Arguments
    ///
    /// * `text` - Memory text (non-blank, at most 100,000 bytes)
    /// * `tags` - Tags; trimmed and de-duplicated keeping first occurrence
    /// * `persona` - Owning persona; blank means "Global"
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Input is empty or too long
    /// - Embedding generation fails
    /// - The entry insert fails, or the vector insert fails (entry rolled back)
    pub async fn ingest<S: AsRef<str>>(
        &self,
        text: &str,
        tags: &[S],
        persona: &str,
    ) -> Result<i64, IngestError> {
        check_input(text).map_err(|check| match check {
            InputCheck::Empty => IngestError::EmptyInput,
            InputCheck::TooLong(actual_length) => IngestError::InputTooLong {
                max_length: MAX_INPUT_LENGTH,
                actual_length,
            },
        })?;

        let text = text.to_string();
        let tags = normalize_tags(tags);
        let persona = normalize_persona(persona);
        let db = self.db.clone();
        let embedder = self.embedder.clone();

        let (id, persona) = run_blocking(move || {
            let embedding = embedder.embed(&text)?;
            let id = db
                .insert_pair(&text, &tags, &persona, &embedding)
                .map_err(|err| match err {
                    PairInsertError::Entry(e) => IngestError::Store(e),
                    PairInsertError::Vector(e) => IngestError::RolledBack(e),
                })?;
            Ok::<_, IngestError>((id, persona))
        })
        .await
        .inspect_err(|e| tracing::warn!(error = %e, "ingest failed"))?;

        tracing::info!(id, persona = %persona, "memory ingested");
        Ok(id)
    }

    /// Remove every memory and vector. The store remains usable afterwards.
    pub async fn clear(&self) -> Result<usize, StoreError> {
        let db = self.db.clone();
        let removed = run_blocking(move || db.clear()).await?;
        tracing::info!(removed, "memory store cleared");
        Ok(removed)
    }
}
