//! Deterministic test doubles for the embedder and inference engine.
//!
//! Used by the crate's own unit and integration tests, and usable by downstream
//! crates that want to exercise the service without model downloads or GPUs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::embedding::{Embedder, EMBEDDING_DIMS};
use crate::engine::{
    ChatSession, EngineContext, InferenceEngine, LoadOptions, LoadedModel, PromptInput, Role, Turn,
};
use crate::errors::{EmbeddingError, EngineError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A constant embedding vector of the right dimension.
pub fn test_embedding(value: f32) -> Vec<f32> {
    vec![value; EMBEDDING_DIMS]
}

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "to", "of", "in", "on", "at", "is", "are", "was", "do", "does",
    "i", "me", "my", "you", "your", "what", "which", "who", "it", "that", "this", "for", "with",
    "human",
];

/// Bag-of-words embedder hashing each content word into one dimension.
///
/// Texts sharing words are close; texts sharing none are orthogonal. Aliases
/// fold related words together and weights make keywords dominate.
#[derive(Debug, Clone, Default)]
pub struct KeywordEmbedder {
    aliases: Vec<(String, String)>,
    weights: Vec<(String, f32)>,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `word` as `canonical`.
    pub fn with_alias(mut self, word: &str, canonical: &str) -> Self {
        self.aliases.push((word.to_lowercase(), canonical.to_lowercase()));
        self
    }

    /// Scale the contribution of `word`.
    pub fn with_weight(mut self, word: &str, weight: f32) -> Self {
        self.weights.push((word.to_lowercase(), weight));
        self
    }

    fn canonical<'a>(&'a self, word: &'a str) -> &'a str {
        self.aliases
            .iter()
            .find(|(w, _)| w == word)
            .map(|(_, c)| c.as_str())
            .unwrap_or(word)
    }

    fn weight(&self, word: &str) -> f32 {
        self.weights
            .iter()
            .find(|(w, _)| w == word)
            .map(|(_, weight)| *weight)
            .unwrap_or(1.0)
    }
}

fn bucket(word: &str) -> usize {
    // FNV-1a
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in word.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % EMBEDDING_DIMS as u64) as usize
}

impl Embedder for KeywordEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; EMBEDDING_DIMS];
        let lowered = text.to_lowercase();
        for raw in lowered.split(|c: char| !c.is_alphanumeric()) {
            if raw.is_empty() || STOPWORDS.contains(&raw) {
                continue;
            }
            let word = self.canonical(raw);
            vector[bucket(word)] += self.weight(word);
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in vector.iter_mut() {
                *x /= norm;
            }
        }
        Ok(vector)
    }
}

/// Embedder that always fails.
#[derive(Debug, Clone, Default)]
pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Inference("embedding backend unavailable".to_string()))
    }
}

/// Observable engine operations, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Load(String),
    CreateContext { model: String, size: u32 },
    CreateSession { model: String, system_prompt: String },
    Prompt { model: String, text: String, history_len: usize, has_image: bool },
    DropSession(String),
    DropContext(String),
    Release(String),
    DropModel(String),
}

/// Scripted outcome of one generation.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Emit these fragments in order.
    Chunks(Vec<String>),
    /// Emit the fragments, then fail.
    FailAfter(Vec<String>, String),
    /// Emit the fragments with a pause before each.
    Slow(Vec<String>, Duration),
    /// Wait for the notification, then emit the fragments.
    Gated(Arc<Notify>, Vec<String>),
}

impl MockReply {
    pub fn text(chunks: &[&str]) -> Self {
        MockReply::Chunks(chunks.iter().map(|c| c.to_string()).collect())
    }
}

#[derive(Default)]
struct MockState {
    events: Mutex<Vec<EngineEvent>>,
    replies: Mutex<VecDeque<MockReply>>,
    load_failure: Mutex<Option<String>>,
    context_failure: Mutex<Option<String>>,
    resident: AtomicUsize,
    max_resident: AtomicUsize,
}

impl MockState {
    fn record(&self, event: EngineEvent) {
        lock(&self.events).push(event);
    }
}

/// In-memory engine recording every lifecycle step.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the reply for the next generation. Without one, "mock response" is streamed.
    pub fn push_reply(&self, reply: MockReply) {
        lock(&self.state.replies).push_back(reply);
    }

    pub fn fail_next_load(&self, message: &str) {
        *lock(&self.state.load_failure) = Some(message.to_string());
    }

    pub fn fail_next_context(&self, message: &str) {
        *lock(&self.state.context_failure) = Some(message.to_string());
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        lock(&self.state.events).clone()
    }

    pub fn clear_events(&self) {
        lock(&self.state.events).clear();
    }

    pub fn count(&self, predicate: impl Fn(&EngineEvent) -> bool) -> usize {
        lock(&self.state.events).iter().filter(|e| predicate(e)).count()
    }

    pub fn load_count(&self) -> usize {
        self.count(|e| matches!(e, EngineEvent::Load(_)))
    }

    /// Models currently resident.
    pub fn resident(&self) -> usize {
        self.state.resident.load(Ordering::SeqCst)
    }

    /// Highest number of models ever resident at once.
    pub fn max_resident(&self) -> usize {
        self.state.max_resident.load(Ordering::SeqCst)
    }

    pub fn last_system_prompt(&self) -> Option<String> {
        lock(&self.state.events).iter().rev().find_map(|e| match e {
            EngineEvent::CreateSession { system_prompt, .. } => Some(system_prompt.clone()),
            _ => None,
        })
    }

    /// Inputs sent to the engine, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.state.events)
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Prompt { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl InferenceEngine for MockEngine {
    async fn load_model(&self, options: LoadOptions) -> Result<Box<dyn LoadedModel>, EngineError> {
        if let Some(message) = lock(&self.state.load_failure).take() {
            return Err(EngineError::new(message));
        }
        self.state.record(EngineEvent::Load(options.model.clone()));
        let now = self.state.resident.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_resident.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(MockModel {
            state: self.state.clone(),
            model: options.model,
        }))
    }
}

struct MockModel {
    state: Arc<MockState>,
    model: String,
}

#[async_trait]
impl LoadedModel for MockModel {
    fn id(&self) -> &str {
        &self.model
    }

    async fn create_context(&self, context_size: u32) -> Result<Box<dyn EngineContext>, EngineError> {
        if let Some(message) = lock(&self.state.context_failure).take() {
            return Err(EngineError::new(message));
        }
        self.state.record(EngineEvent::CreateContext {
            model: self.model.clone(),
            size: context_size,
        });
        Ok(Box::new(MockContext {
            state: self.state.clone(),
            model: self.model.clone(),
        }))
    }

    async fn release(&mut self) -> Result<(), EngineError> {
        self.state.record(EngineEvent::Release(self.model.clone()));
        Ok(())
    }
}

impl Drop for MockModel {
    fn drop(&mut self) {
        self.state.resident.fetch_sub(1, Ordering::SeqCst);
        self.state.record(EngineEvent::DropModel(self.model.clone()));
    }
}

struct MockContext {
    state: Arc<MockState>,
    model: String,
}

#[async_trait]
impl EngineContext for MockContext {
    async fn create_session(&self, system_prompt: &str) -> Result<Box<dyn ChatSession>, EngineError> {
        self.state.record(EngineEvent::CreateSession {
            model: self.model.clone(),
            system_prompt: system_prompt.to_string(),
        });
        Ok(Box::new(MockSession {
            state: self.state.clone(),
            model: self.model.clone(),
            history: Vec::new(),
        }))
    }
}

impl Drop for MockContext {
    fn drop(&mut self) {
        self.state.record(EngineEvent::DropContext(self.model.clone()));
    }
}

struct MockSession {
    state: Arc<MockState>,
    model: String,
    history: Vec<Turn>,
}

#[async_trait]
impl ChatSession for MockSession {
    async fn prompt_stream(
        &mut self,
        input: PromptInput,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, EngineError> {
        self.state.record(EngineEvent::Prompt {
            model: self.model.clone(),
            text: input.text.clone(),
            history_len: self.history.len(),
            has_image: input.image.is_some(),
        });

        let reply = lock(&self.state.replies)
            .pop_front()
            .unwrap_or_else(|| MockReply::text(&["mock ", "response"]));

        let mut full = String::new();
        let (chunks, failure) = match reply {
            MockReply::Chunks(chunks) => (chunks, None),
            MockReply::FailAfter(chunks, message) => (chunks, Some(message)),
            MockReply::Slow(chunks, pause) => {
                for chunk in &chunks {
                    tokio::time::sleep(pause).await;
                    on_chunk(chunk);
                    full.push_str(chunk);
                }
                (Vec::new(), None)
            }
            MockReply::Gated(gate, chunks) => {
                gate.notified().await;
                (chunks, None)
            }
        };

        for chunk in &chunks {
            on_chunk(chunk);
            full.push_str(chunk);
        }
        if let Some(message) = failure {
            return Err(EngineError::new(message));
        }

        self.history.push(Turn {
            role: Role::User,
            text: input.text,
            image: input.image,
        });
        self.history.push(Turn::assistant(full.clone()));
        Ok(full)
    }

    fn history(&self) -> &[Turn] {
        &self.history
    }

    fn replace_history(&mut self, turns: Vec<Turn>) {
        self.history = turns;
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.state.record(EngineEvent::DropSession(self.model.clone()));
    }
}
