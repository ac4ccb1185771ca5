//! Engine adapter for an Ollama-compatible HTTP chat API.
//!
//! Loading and releasing a model map to `POST /api/generate` with a
//! `keep_alive` value and no prompt; generation maps to a streaming
//! `POST /api/chat`, whose body is newline-delimited JSON chunks.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    ChatSession, EngineContext, InferenceEngine, LoadOptions, LoadedModel, PromptInput, Role, Turn,
};
use crate::errors::EngineError;

/// How long the server keeps a loaded model resident between requests.
const KEEP_ALIVE: &str = "30m";

/// Connection settings shared by every handle created from one engine.
#[derive(Debug, Clone)]
struct Endpoint {
    client: reqwest::Client,
    base_url: String,
}

impl Endpoint {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, EngineError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| EngineError::with_source(format!("HTTP request to {path} failed: {e}"), e))?;

        let status = response.status();
        debug!(status = %status, path, "engine response received");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiError>(&body) {
            Ok(api_err) => format!("engine error ({status}): {}", api_err.error),
            Err(_) => format!("engine returned {status}: {body}"),
        };
        Err(EngineError::new(message))
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: String,
}

#[derive(Debug, Serialize)]
struct KeepAliveRequest<'a> {
    model: &'a str,
    keep_alive: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct ModelOptions {
    num_ctx: u32,
    num_gpu: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ModelOptions,
    keep_alive: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<&'a str>>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Splits a byte stream into complete lines, buffering partial ones.
#[derive(Debug, Default)]
struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line).trim().to_string();
            if !text.is_empty() {
                lines.push(text);
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.buffer).trim().to_string();
        self.buffer.clear();
        (!text.is_empty()).then_some(text)
    }
}

/// Handle one NDJSON line. Returns whether the server marked the reply done.
fn apply_line(
    line: &str,
    reply: &mut String,
    on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
) -> Result<bool, EngineError> {
    let chunk: ChatChunk = serde_json::from_str(line)
        .map_err(|e| EngineError::with_source(format!("failed to parse chat chunk: {e}"), e))?;

    if let Some(error) = chunk.error {
        return Err(EngineError::new(format!("engine reported error: {error}")));
    }
    if let Some(message) = chunk.message {
        if !message.content.is_empty() {
            on_chunk(&message.content);
            reply.push_str(&message.content);
        }
    }
    Ok(chunk.done)
}

/// HTTP chat engine.
#[derive(Debug, Clone)]
pub struct OllamaEngine {
    endpoint: Endpoint,
}

impl OllamaEngine {
    /// Create an engine for the server at `base_url` (e.g. `http://127.0.0.1:11434`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EngineError::with_source(format!("failed to build HTTP client: {e}"), e))?;

        Ok(Self {
            endpoint: Endpoint {
                client,
                base_url: base_url.into().trim_end_matches('/').to_string(),
            },
        })
    }
}

#[async_trait]
impl InferenceEngine for OllamaEngine {
    async fn load_model(&self, options: LoadOptions) -> Result<Box<dyn LoadedModel>, EngineError> {
        if let Some(projector) = &options.vision_projector {
            debug!(projector = %projector.display(), "server-side engine bundles its own projector");
        }

        let request = KeepAliveRequest {
            model: &options.model,
            keep_alive: serde_json::Value::from(KEEP_ALIVE),
        };
        self.endpoint.post("/api/generate", &request).await?;

        Ok(Box::new(OllamaModel {
            endpoint: self.endpoint.clone(),
            model: options.model,
            gpu_layers: options.gpu_layers,
            released: false,
        }))
    }
}

struct OllamaModel {
    endpoint: Endpoint,
    model: String,
    gpu_layers: u32,
    released: bool,
}

#[async_trait]
impl LoadedModel for OllamaModel {
    fn id(&self) -> &str {
        &self.model
    }

    async fn create_context(&self, context_size: u32) -> Result<Box<dyn EngineContext>, EngineError> {
        Ok(Box::new(OllamaContext {
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            options: ModelOptions {
                num_ctx: context_size,
                num_gpu: self.gpu_layers,
            },
        }))
    }

    async fn release(&mut self) -> Result<(), EngineError> {
        if self.released {
            return Ok(());
        }
        let request = KeepAliveRequest {
            model: &self.model,
            keep_alive: serde_json::Value::from(0),
        };
        self.endpoint.post("/api/generate", &request).await?;
        self.released = true;
        Ok(())
    }
}

struct OllamaContext {
    endpoint: Endpoint,
    model: String,
    options: ModelOptions,
}

#[async_trait]
impl EngineContext for OllamaContext {
    async fn create_session(&self, system_prompt: &str) -> Result<Box<dyn ChatSession>, EngineError> {
        Ok(Box::new(OllamaSession {
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            options: self.options,
            system_prompt: system_prompt.to_string(),
            history: Vec::new(),
        }))
    }
}

struct OllamaSession {
    endpoint: Endpoint,
    model: String,
    options: ModelOptions,
    system_prompt: String,
    history: Vec<Turn>,
}

impl OllamaSession {
    fn build_messages<'a>(&'a self, input: &'a PromptInput) -> Vec<ChatMessage<'a>> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &self.system_prompt,
                images: None,
            });
        }
        for turn in &self.history {
            messages.push(ChatMessage {
                role: role_name(turn.role),
                content: &turn.text,
                images: turn.image.as_ref().map(|img| vec![img.base64()]),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &input.text,
            images: input.image.as_ref().map(|img| vec![img.base64()]),
        });
        messages
    }
}

#[async_trait]
impl ChatSession for OllamaSession {
    async fn prompt_stream(
        &mut self,
        input: PromptInput,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, EngineError> {
        let response = {
            let request = ChatRequest {
                model: &self.model,
                messages: self.build_messages(&input),
                stream: true,
                options: self.options,
                keep_alive: KEEP_ALIVE,
            };
            self.endpoint.post("/api/chat", &request).await?
        };

        let mut stream = response.bytes_stream();
        let mut decoder = LineDecoder::default();
        let mut reply = String::new();
        let mut done = false;

        while let Some(bytes) = stream.next().await {
            let bytes = bytes
                .map_err(|e| EngineError::with_source(format!("chat stream read failed: {e}"), e))?;
            for line in decoder.push(&bytes) {
                done |= apply_line(&line, &mut reply, on_chunk)?;
            }
        }
        if let Some(line) = decoder.finish() {
            done |= apply_line(&line, &mut reply, on_chunk)?;
        }

        if !done {
            warn!(model = %self.model, received = reply.len(), "chat stream ended without completion marker");
            return Err(EngineError::new("chat stream ended before the reply was complete"));
        }

        self.history.push(Turn {
            role: Role::User,
            text: input.text,
            image: input.image,
        });
        self.history.push(Turn::assistant(reply.clone()));
        Ok(reply)
    }

    fn history(&self) -> &[Turn] {
        &self.history
    }

    fn replace_history(&mut self, turns: Vec<Turn>) {
        self.history = turns;
    }
}
