//! Error types for ltm-engine.
//!
//! Each component owns a narrow error enum; [`Error`] wraps them for callers
//! (the CLI, the service facade) that cross component boundaries.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use crate::sqlite::Error as StoreError;

/// Main error type for ltm-engine operations.
#[derive(Error, Debug)]
pub enum Error {
    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding client error.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Store error outside of ingest/retrieve (open, clear, reads).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Ingest failed.
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// Retrieve failed.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    /// Session lifecycle failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Streaming request could not start.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Inference engine setup failed.
    #[error("Inference engine error: {0}")]
    Engine(#[from] EngineError),

    /// Memory not found.
    #[error("Memory not found: {0}")]
    NotFound(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Embedding computation failed. Aborts ingest/retrieve before any row is touched.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Tokenization error.
    #[error("Tokenization error: {0}")]
    Tokenization(#[from] tokenizers::Error),

    /// ONNX session error.
    #[error("ONNX session error: {0}")]
    Onnx(#[from] ort::Error),

    /// HuggingFace Hub error.
    #[error("HuggingFace Hub error: {0}")]
    HfHub(#[from] hf_hub::api::sync::ApiError),

    /// Model produced an unusable output.
    #[error("Inference error: {0}")]
    Inference(String),

    /// The blocking embedding worker panicked or its lock was poisoned.
    #[error("Embedding worker failed: {0}")]
    Worker(String),
}

/// Ingest failed; no partial entry/vector pair remains.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Text was empty or whitespace-only.
    #[error("Input cannot be empty")]
    EmptyInput,

    /// Text exceeded the input guard.
    #[error("Input too long: {actual_length} bytes exceeds maximum of {max_length}")]
    InputTooLong {
        max_length: usize,
        actual_length: usize,
    },

    /// Embedding computation failed; nothing was written.
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// The entry insert failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The vector insert failed after the entry insert; the entry was rolled back.
    #[error("Vector insert failed, entry rolled back: {0}")]
    RolledBack(StoreError),
}

/// Retrieve failed; no partial result is returned.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Query was empty or whitespace-only.
    #[error("Query cannot be empty")]
    EmptyInput,

    /// Query exceeded the input guard.
    #[error("Query too long: {actual_length} bytes exceeds maximum of {max_length}")]
    InputTooLong {
        max_length: usize,
        actual_length: usize,
    },

    /// Query embedding failed.
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// The index query failed.
    #[error("Index query failed: {0}")]
    Store(#[from] StoreError),
}

/// Failure reported by an inference engine implementation.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Session lifecycle errors.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Model, context, or session construction failed. The manager is back in `Unloaded`.
    #[error("Failed to load session for model '{model}': {source}")]
    Load {
        model: String,
        #[source]
        source: EngineError,
    },

    /// No model identifier was supplied.
    #[error("No model identifier provided")]
    MissingModel,

    /// A stream was requested before `create_session`.
    #[error("No active session. Call create_session first.")]
    NotReady,
}

/// Generation failed. Never escapes the streaming orchestrator.
#[derive(Error, Debug)]
pub enum GenerationError {
    /// Multimodal generation exceeded its time bound.
    #[error("Vision inference timed out after {0:?}")]
    InferenceTimeout(Duration),

    /// Any other engine failure.
    #[error("Generation failed: {0}")]
    Engine(#[from] EngineError),

    /// Image payload could not be decoded.
    #[error("Invalid image attachment: {0}")]
    InvalidImage(String),
}

/// A stream request that failed before generation began.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Memory retrieval for the prompt failed.
    #[error("Memory retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    /// No usable session.
    #[error(transparent)]
    Session(#[from] SessionError),
}
