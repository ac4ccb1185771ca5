//! Service facade wiring the memory store, session manager, and orchestrator.
//!
//! This is the surface an outer application (chat UI bridge, CLI) talks to.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;
use crate::embedding::{Embedder, OnnxEmbedder};
use crate::engine::{InferenceEngine, OllamaEngine};
use crate::errors::{
    EmbeddingError, Error, IngestError, RetrievalError, SessionError, StoreError, StreamError,
};
use crate::memory::{MemoryStore, RetrievalSettings};
use crate::memory_types::{RetrieveOptions, RetrievedMemory};
use crate::session::{Persona, SessionHandle, SessionManager, SessionSettings, SessionState};
use crate::stream::{Orchestrator, PromptPayload, StreamEvent, StreamSettings};

/// Long-term memory engine: one store, one session manager, one orchestrator.
#[derive(Clone)]
pub struct LtmService {
    orchestrator: Orchestrator,
}

impl LtmService {
    /// Assemble a service from already constructed parts.
    pub fn from_parts(
        store: MemoryStore,
        engine: Arc<dyn InferenceEngine>,
        session_settings: SessionSettings,
        stream_settings: StreamSettings,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(engine, session_settings));
        Self {
            orchestrator: Orchestrator::new(store, sessions, stream_settings),
        }
    }

    /// Open the service described by `config`.
    ///
    /// Downloads the embedding model on first use, opens (or migrates) the
    /// database, and points the inference engine at `config.engine_url`. No
    /// model is loaded until a session is created.
    ///
    /// # Errors
    ///
    /// Returns error if directories cannot be created, the embedding model
    /// cannot be loaded, the database cannot be opened, or the engine URL is
    /// unusable.
    pub async fn open(config: &Config) -> Result<Self, Error> {
        config.ensure_directories()?;

        let model_id = config.embedding_model.clone();
        let cache_dir = config.model_cache.clone();
        let embedder = tokio::task::spawn_blocking(move || OnnxEmbedder::load(&model_id, &cache_dir))
            .await
            .map_err(|e| EmbeddingError::Worker(e.to_string()))??;
        info!(model = %config.embedding_model, "embedding model ready");

        let engine = OllamaEngine::new(config.engine_url.clone())?;
        Self::open_with(config, Arc::new(embedder), Arc::new(engine))
    }

    /// Open the store at `config.database_path` with caller-supplied backends.
    pub fn open_with(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        engine: Arc<dyn InferenceEngine>,
    ) -> Result<Self, Error> {
        let store = MemoryStore::open(&config.database_path, embedder, RetrievalSettings::from(config))?;
        info!(path = %config.database_path.display(), "memory store opened");
        Ok(Self::from_parts(
            store,
            engine,
            SessionSettings::from(config),
            StreamSettings::from(config),
        ))
    }

    pub async fn ingest<S: AsRef<str>>(
        &self,
        text: &str,
        tags: &[S],
        persona: &str,
    ) -> Result<i64, IngestError> {
        self.store().ingest(text, tags, persona).await
    }

    pub async fn retrieve(
        &self,
        query: &str,
        limit: usize,
        options: &RetrieveOptions,
    ) -> Result<Vec<RetrievedMemory>, RetrievalError> {
        self.store().retrieve(query, limit, options).await
    }

    /// Delete every memory. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize, StoreError> {
        self.store().clear().await
    }

    pub async fn create_session(
        &self,
        model: &str,
        system_prompt: &str,
    ) -> Result<SessionHandle, SessionError> {
        self.sessions().create_session(model, system_prompt).await
    }

    pub async fn create_persona_session(
        &self,
        persona: &Persona,
        base_prompt: &str,
    ) -> Result<SessionHandle, SessionError> {
        self.sessions()
            .create_persona_session(persona, base_prompt)
            .await
    }

    pub fn session_state(&self) -> SessionState {
        self.sessions().state()
    }

    pub async fn stream_response<F>(
        &self,
        payload: PromptPayload,
        on_chunk: F,
    ) -> Result<Option<String>, StreamError>
    where
        F: FnMut(&str) + Send,
    {
        self.orchestrator.stream_response(payload, on_chunk).await
    }

    pub fn stream_channel(&self, payload: PromptPayload) -> mpsc::UnboundedReceiver<StreamEvent> {
        self.orchestrator.stream_channel(payload)
    }

    /// Wait for pending background ingestion.
    pub async fn settle(&self) {
        self.orchestrator.settle().await;
    }

    /// Finish background work, then release the loaded model.
    pub async fn shutdown(&self) {
        self.orchestrator.settle().await;
        self.sessions().dispose().await;
        info!("service shut down");
    }

    pub fn store(&self) -> &MemoryStore {
        self.orchestrator.store()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        self.orchestrator.sessions()
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{KeywordEmbedder, MockEngine};
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        Config {
            database_path: dir.path().join("memory.db"),
            model_cache: dir.path().join("models"),
            settle_delay_ms: 1,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_open_with_and_roundtrip() {
        let dir = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let service = LtmService::open_with(
            &config_in(&dir),
            Arc::new(KeywordEmbedder::new()),
            Arc::new(engine.clone()),
        )
        .unwrap();

        service
            .ingest("The Human owns a bicycle", &["possessions"], "Global")
            .await
            .unwrap();
        let hits = service
            .retrieve("bicycle", 5, &RetrieveOptions::unrestricted())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        service.create_session("modelA", "sys").await.unwrap();
        let reply = service
            .stream_response(PromptPayload::new("hi"), |_: &str| {})
            .await
            .unwrap();
        assert_eq!(reply.as_deref(), Some("mock response"));

        assert_eq!(service.clear().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_open_with_rejects_parent_dir_path() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.database_path = dir.path().join("../escape.db");

        let result = LtmService::open_with(
            &config,
            Arc::new(KeywordEmbedder::new()),
            Arc::new(MockEngine::new()),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_shutdown_releases_model() {
        let dir = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let service = LtmService::open_with(
            &config_in(&dir),
            Arc::new(KeywordEmbedder::new()),
            Arc::new(engine.clone()),
        )
        .unwrap();

        service.create_session("modelA", "sys").await.unwrap();
        service.shutdown().await;

        assert_eq!(service.session_state(), SessionState::Unloaded);
        assert_eq!(engine.resident(), 0);
    }
}
