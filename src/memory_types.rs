//! Memory store data types.

use serde::Serialize;

/// Reserved persona label for shared, unscoped memories.
pub const GLOBAL_PERSONA: &str = "Global";

/// Tag attached to records written by the auto-ingestion feedback loop.
pub const AUTO_MEMORY_TAG: &str = "auto-memory";

/// A stored memory record. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryEntry {
    /// Monotonic identifier assigned by the store.
    pub id: i64,
    pub text: String,
    /// Ordered, de-duplicated tags.
    pub tags: Vec<String>,
    pub persona: String,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}

/// A memory returned by similarity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedMemory {
    pub id: i64,
    pub text: String,
    pub tags: Vec<String>,
    pub persona: String,
    pub created_at: i64,
    /// Cosine distance to the query (0.0 = identical direction).
    pub distance: f64,
}

/// Persona scoping for a retrieve call.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    /// Requesting persona. `None` means the shared "Global" pool.
    pub persona: Option<String>,
    /// Restrict results to `persona` plus "Global".
    pub isolate: bool,
}

impl RetrieveOptions {
    /// Search across every persona.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Search the given persona plus the "Global" pool.
    pub fn isolated(persona: impl Into<String>) -> Self {
        Self {
            persona: Some(persona.into()),
            isolate: true,
        }
    }

    /// The persona label retrieval filters on when isolating.
    pub fn effective_persona(&self) -> &str {
        match self.persona.as_deref() {
            Some(p) if !p.trim().is_empty() => p.trim(),
            _ => GLOBAL_PERSONA,
        }
    }
}

/// Normalize a persona label, mapping blank labels to "Global".
pub fn normalize_persona(persona: &str) -> String {
    let trimmed = persona.trim();
    if trimmed.is_empty() {
        GLOBAL_PERSONA.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Normalize tags into an ordered set.
///
/// Tags are trimmed, blank tags dropped, comma-joined tags split (tags are stored
/// comma-separated), and duplicates removed keeping the first occurrence.
pub fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw in tags {
        for part in raw.as_ref().split(',') {
            let tag = part.trim();
            if !tag.is_empty() && !out.iter().any(|t| t == tag) {
                out.push(tag.to_string());
            }
        }
    }
    out
}
