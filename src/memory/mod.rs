//! Core memory store orchestrating embedding and SQLite operations.
//!
//! Provides the async API for ingesting, retrieving, and clearing memories with
//! automatic embedding generation through an [`Embedder`](crate::embedding::Embedder).

mod crud;
mod ingest;
mod retrieve;

// pub(crate): module internals hidden; public items re-exported explicitly via lib.rs
pub(crate) mod store;

pub use store::{MemoryStore, RetrievalSettings};
