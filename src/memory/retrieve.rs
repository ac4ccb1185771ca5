//! Read path: similarity retrieval with persona isolation.

use crate::errors::RetrievalError;
use crate::memory_types::{RetrieveOptions, RetrievedMemory, GLOBAL_PERSONA};
use crate::sqlite::search::validate_limit;

use super::store::{check_input, run_blocking, InputCheck, MemoryStore, RetrievalSettings, MAX_INPUT_LENGTH};

/// Number of nearest neighbours to fetch before filtering.
///
/// Isolated queries over-fetch so that dropping other personas' entries still
/// leaves up to `limit` candidates.
pub(crate) fn fetch_size(limit: usize, isolate: bool, settings: &RetrievalSettings) -> usize {
    if isolate {
        limit.max(settings.isolation_overfetch)
    } else {
        limit
    }
}

/// Apply the persona filter, then the relevance cutoff, then truncate.
///
/// `candidates` must already be sorted by ascending distance.
pub(crate) fn select_relevant(
    candidates: Vec<RetrievedMemory>,
    limit: usize,
    options: &RetrieveOptions,
    relevance_cutoff: f64,
) -> Vec<RetrievedMemory> {
    let persona = options.effective_persona();
    candidates
        .into_iter()
        .filter(|m| !options.isolate || m.persona == persona || m.persona == GLOBAL_PERSONA)
        .filter(|m| m.distance < relevance_cutoff)
        .take(limit)
        .collect()
}

impl MemoryStore {
    #[must_use = "handle the error or results may be lost"]
    /// Find the memories most similar to `query`.
    ///
    /// With `options.isolate`, only memories owned by the requesting persona or
    /// "Global" are returned. Results never include a candidate whose distance
    /// reaches the relevance cutoff, and are ordered best first. An empty result
    /// is not an error.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Query is empty or too long
    /// - Limit is 0 or exceeds MAX_SEARCH_LIMIT
    /// - Embedding generation or the index query fails
    pub async fn retrieve(
        &self,
        query: &str,
        limit: usize,
        options: &RetrieveOptions,
    ) -> Result<Vec<RetrievedMemory>, RetrievalError> {
        check_input(query).map_err(|check| match check {
            InputCheck::Empty => RetrievalError::EmptyInput,
            InputCheck::TooLong(actual_length) => RetrievalError::InputTooLong {
                max_length: MAX_INPUT_LENGTH,
                actual_length,
            },
        })?;
        validate_limit(limit)?;

        let k = fetch_size(limit, options.isolate, &self.settings);
        let query = query.to_string();
        let db = self.db.clone();
        let embedder = self.embedder.clone();

        let candidates = run_blocking(move || {
            let embedding = embedder.embed(&query)?;
            Ok::<_, RetrievalError>(db.nearest(&embedding, k)?)
        })
        .await
        .inspect_err(|e| tracing::warn!(error = %e, "retrieve failed"))?;

        let fetched = candidates.len();
        let results = select_relevant(candidates, limit, options, self.settings.relevance_cutoff);
        tracing::debug!(
            k,
            fetched,
            returned = results.len(),
            isolate = options.isolate,
            persona = options.effective_persona(),
            "memories retrieved"
        );
        Ok(results)
    }
}
