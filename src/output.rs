//! JSON response types and formatting for CLI output.

use chrono::DateTime;
use serde::Serialize;

/// Response for a successful ingest.
#[derive(Serialize)]
pub struct IngestResponse {
    pub status: String,
    pub id: i64,
}

/// Response for retrieval results.
#[derive(Serialize)]
pub struct RetrieveResponse {
    pub results: Vec<RetrievedItem>,
}

/// Individual retrieved memory.
#[derive(Serialize)]
pub struct RetrievedItem {
    pub id: i64,
    pub text: String,
    pub tags: Vec<String>,
    pub persona: String,
    pub distance: f64,
    pub created_at: String,
}

/// Response for fetching a single memory.
#[derive(Serialize)]
pub struct GetResponse {
    pub id: i64,
    pub text: String,
    pub tags: Vec<String>,
    pub persona: String,
    pub created_at: String,
}

/// Response for listing memories.
#[derive(Serialize)]
pub struct ListResponse {
    pub memories: Vec<GetResponse>,
}

/// Response for clearing the store.
#[derive(Serialize)]
pub struct ClearResponse {
    pub status: String,
    pub deleted: usize,
}

/// Response for a chat turn.
#[derive(Serialize)]
pub struct ChatResponse {
    pub model: String,
    pub session: String,
    /// `None` when generation failed.
    pub reply: Option<String>,
}

/// Response for errors.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Render a Unix timestamp as RFC 3339, falling back to the raw number.
pub fn format_timestamp(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

/// Print a value as formatted JSON to stdout.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to serialize JSON: {}", e);
            std::process::exit(1);
        }
    }
}
