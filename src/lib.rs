//! ltm-engine - persona-aware long-term memory for local chat models.
//!
//! Three parts work together:
//!
//! - a vector [`MemoryStore`] that embeds short texts with an ONNX sentence
//!   model and keeps them in SQLite, tagged and scoped by persona;
//! - a [`SessionManager`] that keeps exactly one model resident, reusing it
//!   when possible and disposing it before a different one is loaded;
//! - an [`Orchestrator`] that retrieves relevant memories for each chat turn,
//!   streams the reply, and files a compact record of the exchange back into
//!   the store.
//!
//! # Example
//!
//! ```no_run
//! use ltm_engine::{Config, LtmService, PromptPayload, RetrieveOptions};
//!
//! # async fn run() -> Result<(), ltm_engine::Error> {
//! let config = Config::load()?;
//! let service = LtmService::open(&config).await?;
//!
//! service.ingest("The Human loves oat milk.", &["food"], "Global").await?;
//! let memories = service
//!     .retrieve("What milk do I like?", 5, &RetrieveOptions::unrestricted())
//!     .await?;
//! println!("{} relevant memories", memories.len());
//!
//! service.create_session("llama3.2", "You are a helpful assistant.").await?;
//! let reply = service
//!     .stream_response(PromptPayload::new("What milk do I like?"), |chunk: &str| {
//!         print!("{chunk}")
//!     })
//!     .await?;
//! if reply.is_none() {
//!     eprintln!("generation failed");
//! }
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod embedding;
pub mod engine;
pub mod errors;
pub mod memory;
pub mod memory_types;
pub mod service;
pub mod session;
mod sqlite;
pub mod stream;
pub mod testing;
pub mod text;

// Re-export public API
pub use config::Config;
pub use embedding::{Embedder, EmbeddingEngine, OnnxEmbedder, EMBEDDING_DIMS};
pub use engine::{InferenceEngine, OllamaEngine, Role, Turn};
pub use errors::{
    EngineError, Error, IngestError, RetrievalError, SessionError, StoreError, StreamError,
};
pub use memory::store::{MAX_INPUT_LENGTH, MAX_SEARCH_LIMIT};
pub use memory::{MemoryStore, RetrievalSettings};
pub use memory_types::{
    MemoryEntry, RetrieveOptions, RetrievedMemory, AUTO_MEMORY_TAG, GLOBAL_PERSONA,
};
pub use service::LtmService;
pub use session::{Persona, SessionHandle, SessionManager, SessionSettings, SessionState};
pub use stream::{Orchestrator, PromptPayload, StreamEvent, StreamSettings};
