//! Nearest-neighbour queries over the vector table.

use super::{embedding, tags_from_column, Database, Error};
use crate::memory_types::{RetrievedMemory, GLOBAL_PERSONA};

pub type Result<T> = std::result::Result<T, Error>;

const MAX_SEARCH_LIMIT: usize = 10_000;

/// Validate search limit is within acceptable bounds.
pub fn validate_limit(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(Error::InvalidLimit(
            "Limit must be greater than 0".to_string(),
        ));
    }
    if limit > i64::MAX as usize || limit > MAX_SEARCH_LIMIT {
        return Err(Error::InvalidLimit(format!(
            "Limit {} exceeds maximum allowed ({})",
            limit, MAX_SEARCH_LIMIT
        )));
    }
    Ok(())
}

impl Database {
    /// The `k` stored entries closest to `query_embedding` by cosine distance.
    ///
    /// Scans every vector regardless of persona; callers filter afterwards. Results
    /// are ordered by ascending distance, ties broken by ascending id.
    ///
    /// # Errors
    ///
    /// Returns error if the query embedding has invalid dimensions, a stored
    /// vector is malformed, or the database query fails.
    pub fn nearest(&self, query_embedding: &[f32], k: usize) -> Result<Vec<RetrievedMemory>> {
        validate_limit(k)?;
        if query_embedding.len() != crate::embedding::EMBEDDING_DIMS {
            return Err(Error::MismatchedDimensions {
                expected: crate::embedding::EMBEDDING_DIMS,
                actual: query_embedding.len(),
            });
        }

        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT e.id, e.text, e.tags, e.persona, e.created_at, v.embedding
            FROM memory_entries e
            JOIN memory_vectors v ON v.entry_id = e.id
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Vec<u8>>(5)?,
            ))
        })?;

        let mut hits: Vec<RetrievedMemory> = Vec::new();
        for row_result in rows {
            let (id, text, tags, persona, created_at, blob) = row_result?;
            let stored = embedding::blob_to_vec(&blob)?;
            let distance = embedding::cosine_distance(query_embedding, &stored)?;

            hits.push(RetrievedMemory {
                id,
                text,
                tags: tags_from_column(tags.as_deref().unwrap_or_default()),
                persona: persona.unwrap_or_else(|| GLOBAL_PERSONA.to_string()),
                created_at,
                distance,
            });
        }

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}
