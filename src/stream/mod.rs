//! Streaming response pipeline.
//!
//! One [`Orchestrator::stream_response`] call retrieves relevant memories,
//! prompts the active session with them, forwards every fragment to the caller
//! as it arrives, and afterwards files a compact record of the exchange back
//! into the memory store on a background task.
//!
//! Generation failures never escape: the caller gets an inline error fragment
//! and `Ok(None)`. Only failures before generation starts (no session, memory
//! retrieval failed) are returned as errors.

pub mod context;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::{ChatSession, ImageAttachment, PromptInput, Turn};
use crate::errors::{GenerationError, StreamError};
use crate::memory::MemoryStore;
use crate::memory_types::{normalize_persona, RetrieveOptions, AUTO_MEMORY_TAG, GLOBAL_PERSONA};
use crate::session::{Persona, SessionManager};
use crate::text::{compose_memory_record, estimate_tokens};

/// Fragment emitted when generation fails.
pub const GENERATION_ERROR_CHUNK: &str =
    "\n\n*[System Error: The neural pathway collapsed. Check terminal for VRAM/Vision errors.]*";

/// One chat turn as submitted by the caller.
#[derive(Debug, Clone, Default)]
pub struct PromptPayload {
    pub text: String,
    /// Data URL or bare base64.
    pub image: Option<String>,
    /// Prior turns. When non-empty they replace the session's own history.
    pub history: Vec<Turn>,
    pub persona: Option<String>,
    pub isolate: bool,
    /// Context window in tokens used to budget history. `None` uses the
    /// window the session was created with.
    pub context_length: Option<u32>,
}

impl PromptPayload {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// A turn scoped to `persona`'s memories and context window.
    pub fn for_persona(text: impl Into<String>, persona: &Persona) -> Self {
        let options = persona.retrieve_options();
        Self {
            text: text.into(),
            persona: options.persona,
            isolate: options.isolate,
            context_length: persona.context_length,
            ..Default::default()
        }
    }

    fn retrieve_options(&self) -> RetrieveOptions {
        RetrieveOptions {
            persona: self.persona.clone(),
            isolate: self.isolate,
        }
    }

    /// Persona the exchange is filed under.
    fn ingest_persona(&self) -> String {
        if self.isolate {
            normalize_persona(self.persona.as_deref().unwrap_or_default())
        } else {
            GLOBAL_PERSONA.to_string()
        }
    }
}

/// Events delivered by [`Orchestrator::stream_channel`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(String),
    /// Generation finished; `None` when it failed after an error chunk.
    Done { final_text: Option<String> },
    /// The request failed before generation began.
    Error { message: String },
}

/// Tunables for the streaming pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Memories retrieved per turn.
    pub retrieval_limit: usize,
    /// Upper bound on a generation that carries an image.
    pub vision_timeout: Duration,
    /// User messages shorter than this (in characters) are not auto-ingested.
    pub auto_ingest_min_chars: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            retrieval_limit: 5,
            vision_timeout: Duration::from_secs(30),
            auto_ingest_min_chars: 20,
        }
    }
}

impl From<&Config> for StreamSettings {
    fn from(config: &Config) -> Self {
        Self {
            retrieval_limit: config.retrieval_limit,
            vision_timeout: Duration::from_secs(config.vision_timeout_secs),
            auto_ingest_min_chars: config.auto_ingest_min_chars,
        }
    }
}

fn error_chunk(err: &GenerationError) -> String {
    match err {
        GenerationError::InferenceTimeout(limit) => format!(
            "\n\n*[System Error: VRAM Exhausted: Vision inference timed out after {}s. \
Try reducing image size or using a smaller model.]*",
            limit.as_secs()
        ),
        _ => GENERATION_ERROR_CHUNK.to_string(),
    }
}

/// Runs chat turns against the memory store and the active session.
#[derive(Clone)]
pub struct Orchestrator {
    store: MemoryStore,
    sessions: Arc<SessionManager>,
    tracker: TaskTracker,
    settling: Arc<Mutex<()>>,
    settings: StreamSettings,
}

impl Orchestrator {
    pub fn new(store: MemoryStore, sessions: Arc<SessionManager>, settings: StreamSettings) -> Self {
        Self {
            store,
            sessions,
            tracker: TaskTracker::new(),
            settling: Arc::new(Mutex::new(())),
            settings,
        }
    }

    /// Stream one reply, calling `on_chunk` with each fragment in order.
    ///
    /// Returns the full reply, which always equals the concatenation of the
    /// fragments passed to `on_chunk`. On a generation failure a final error
    /// fragment is emitted and `Ok(None)` is returned.
    ///
    /// # Errors
    ///
    /// Returns error if no session has been created or memory retrieval fails.
    pub async fn stream_response<F>(
        &self,
        payload: PromptPayload,
        mut on_chunk: F,
    ) -> Result<Option<String>, StreamError>
    where
        F: FnMut(&str) + Send,
    {
        let mut active = self.sessions.lock_active().await?;
        let session_id = active.handle().id;
        info!(
            session = %session_id,
            model = %active.handle().model,
            prompt_len = payload.text.len(),
            has_image = payload.image.is_some(),
            "stream started"
        );

        let memories = if payload.text.trim().is_empty() {
            Vec::new()
        } else {
            self.store
                .retrieve(
                    &payload.text,
                    self.settings.retrieval_limit,
                    &payload.retrieve_options(),
                )
                .await?
        };
        debug!(session = %session_id, memories = memories.len(), "context retrieved");

        let prompt_text = context::compose_prompt(&memories, &payload.text);
        let window = payload
            .context_length
            .filter(|&n| n > 0)
            .unwrap_or(active.context_size());
        let prior = if payload.history.is_empty() {
            active.chat().history().to_vec()
        } else {
            payload.history.clone()
        };
        let supplied = prior.len();
        let history = context::fit_history(prior, window, estimate_tokens(&prompt_text));
        debug!(kept = history.len(), supplied, window, "history fitted");
        active.chat().replace_history(history);

        let mut streamed = String::new();
        let result = {
            let mut forward = |chunk: &str| {
                streamed.push_str(chunk);
                on_chunk(chunk);
            };
            self.generate(active.chat(), prompt_text, payload.image.as_deref(), &mut forward)
                .await
        };
        drop(active);

        match result {
            Ok(engine_text) => {
                if engine_text != streamed {
                    debug!(
                        engine_len = engine_text.len(),
                        streamed_len = streamed.len(),
                        "engine reply differs from streamed fragments, using fragments"
                    );
                }
                info!(session = %session_id, reply_len = streamed.len(), "stream finished");
                self.spawn_auto_ingest(&payload, &streamed);
                Ok(Some(streamed))
            }
            Err(e) => {
                error!(session = %session_id, error = %e, "generation failed");
                on_chunk(&error_chunk(&e));
                Ok(None)
            }
        }
    }

    async fn generate(
        &self,
        chat: &mut dyn ChatSession,
        text: String,
        image: Option<&str>,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Result<String, GenerationError> {
        let image = image.map(ImageAttachment::from_payload).transpose()?;
        let Some(image) = image else {
            let input = PromptInput { text, image: None };
            return Ok(chat.prompt_stream(input, on_chunk).await?);
        };

        let limit = self.settings.vision_timeout;
        let input = PromptInput {
            text,
            image: Some(image),
        };
        match tokio::time::timeout(limit, chat.prompt_stream(input, on_chunk)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(GenerationError::InferenceTimeout(limit)),
        }
    }

    fn spawn_auto_ingest(&self, payload: &PromptPayload, reply: &str) {
        if payload.text.chars().count() < self.settings.auto_ingest_min_chars {
            debug!("user message too short for auto-ingest");
            return;
        }
        if reply.trim().is_empty() {
            return;
        }
        let Some(record) = compose_memory_record(&payload.text, reply) else {
            debug!("reply has no usable sentence, skipping auto-ingest");
            return;
        };

        let persona = payload.ingest_persona();
        let store = self.store.clone();
        self.tracker.spawn(async move {
            match store.ingest(&record, &[AUTO_MEMORY_TAG], &persona).await {
                Ok(id) => info!(id, persona = %persona, "exchange auto-ingested"),
                Err(e) => warn!(error = %e, "auto-ingest failed"),
            }
        });
    }

    /// Stream on a background task, delivering events over a channel.
    ///
    /// Dropping the receiver does not cancel generation.
    pub fn stream_channel(&self, payload: PromptPayload) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let this = self.clone();
        self.tracker.spawn(async move {
            let chunk_tx = tx.clone();
            let result = this
                .stream_response(payload, move |chunk: &str| {
                    let _ = chunk_tx.send(StreamEvent::Chunk(chunk.to_string()));
                })
                .await;
            let last = match result {
                Ok(final_text) => StreamEvent::Done { final_text },
                Err(e) => StreamEvent::Error {
                    message: e.to_string(),
                },
            };
            let _ = tx.send(last);
        });
        rx
    }

    /// Wait for every background task spawned so far.
    ///
    /// Overlapping calls run one after another, so no call reopens the
    /// tracker while another is still waiting on it.
    pub async fn settle(&self) {
        let _settling = self.settling.lock().await;
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }
}
