//! Text-generation engine interface.
//!
//! The session manager and streaming orchestrator only ever talk to these
//! traits. The lifecycle mirrors how local runtimes work: a loaded model owns
//! accelerator memory, a context is a sized KV cache carved out of it, and a
//! chat session is a conversation bound to one context and one system prompt.
//!
//! Two shapes of engine sit behind the same traits:
//! - in-process runtimes implement them directly over their native handles;
//! - [`ollama::OllamaEngine`] maps them onto a remote HTTP chat API.

pub mod ollama;
pub mod vision;

use std::path::PathBuf;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, GenerationError};
use crate::text::strip_data_url_prefix;

pub use ollama::OllamaEngine;

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of conversation history.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub image: Option<ImageAttachment>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            image: None,
        }
    }
}

/// An inline image, held as validated base64 without any data-URL envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttachment {
    encoded: String,
}

impl ImageAttachment {
    /// Accept either a `data:image/...;base64,` URL or bare base64.
    pub fn from_payload(payload: &str) -> Result<Self, GenerationError> {
        let encoded = strip_data_url_prefix(payload);
        if encoded.is_empty() {
            return Err(GenerationError::InvalidImage("image payload is empty".to_string()));
        }
        STANDARD
            .decode(encoded)
            .map_err(|e| GenerationError::InvalidImage(e.to_string()))?;
        Ok(Self {
            encoded: encoded.to_string(),
        })
    }

    /// Base64 text as engines expect it inline.
    pub fn base64(&self) -> &str {
        &self.encoded
    }
}

/// Input for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptInput {
    pub text: String,
    pub image: Option<ImageAttachment>,
}

/// How to load a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Model identifier: a file path for local runtimes, a tag for remote ones.
    pub model: String,
    /// Companion visual projector to load alongside the model.
    pub vision_projector: Option<PathBuf>,
    /// Layers to offload to the accelerator.
    pub gpu_layers: u32,
}

/// Loads models. One engine instance backs the whole process.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn load_model(&self, options: LoadOptions) -> Result<Box<dyn LoadedModel>, EngineError>;
}

/// A resident model.
#[async_trait]
pub trait LoadedModel: Send + Sync {
    fn id(&self) -> &str;

    async fn create_context(&self, context_size: u32) -> Result<Box<dyn EngineContext>, EngineError>;

    /// Free the model's accelerator memory. Called before the handle is dropped
    /// on a model swap; dropping alone must also be safe.
    async fn release(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// A sized generation context on a loaded model.
#[async_trait]
pub trait EngineContext: Send + Sync {
    async fn create_session(&self, system_prompt: &str) -> Result<Box<dyn ChatSession>, EngineError>;
}

/// A conversation bound to one context and system prompt.
#[async_trait]
pub trait ChatSession: Send {
    /// Generate a reply to `input`, calling `on_chunk` with each fragment in
    /// production order. Returns the full reply; on success the user and
    /// assistant turns are appended to the history.
    async fn prompt_stream(
        &mut self,
        input: PromptInput,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, EngineError>;

    fn history(&self) -> &[Turn];

    fn replace_history(&mut self, turns: Vec<Turn>);
}
