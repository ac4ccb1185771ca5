//! Inference session lifecycle.
//!
//! [`SessionManager`] owns the single resident model, its context, and the
//! active chat session in one mutex-guarded slot. Creating a session takes one
//! of three paths:
//!
//! - **reuse**: same model, prompt, and context size; nothing is rebuilt;
//! - **recreate**: same model, new prompt; the session and context are dropped,
//!   a short settle delay lets the engine reclaim memory, then both are rebuilt;
//! - **swap**: different model; session, context, and model are all released
//!   before the new model is loaded, so two models are never resident at once.
//!
//! Any failure tears everything down and leaves the manager `Unloaded`.
//!
//! Streaming holds the slot for the whole generation, so a swap requested
//! mid-stream waits its turn (the mutex is fair).

pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::{vision, ChatSession, EngineContext, InferenceEngine, LoadedModel};
use crate::errors::{EngineError, SessionError};

pub use prompt::{compose_system_prompt, Persona};

/// Lifecycle state of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unloaded,
    Loading,
    Ready,
    Swapping,
    RecreatingContext,
}

/// Identifies the active session. A new id is issued whenever the session is rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionHandle {
    pub id: Uuid,
    pub model: String,
}

/// Tunables for session construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Context size used when a caller does not supply one.
    pub context_size: u32,
    /// Pause between dropping an old context and creating a new one on the same model.
    pub settle_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            context_size: 4096,
            settle_delay: Duration::from_millis(200),
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            context_size: config.context_size,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
        }
    }
}

struct Resident {
    id: String,
    handle: Box<dyn LoadedModel>,
}

#[derive(Default)]
struct Slot {
    model: Option<Resident>,
    context: Option<Box<dyn EngineContext>>,
    session: Option<Box<dyn ChatSession>>,
    system_prompt: String,
    context_size: u32,
    handle: Option<SessionHandle>,
}

impl Slot {
    fn reusable(&self, model: &str, system_prompt: &str, context_size: u32) -> Option<SessionHandle> {
        let resident = self.model.as_ref()?;
        if resident.id == model
            && self.session.is_some()
            && self.system_prompt == system_prompt
            && self.context_size == context_size
        {
            self.handle.clone()
        } else {
            None
        }
    }

    /// Drop the session, then the context. The model stays resident.
    fn drop_session(&mut self) {
        self.handle = None;
        self.system_prompt.clear();
        drop(self.session.take());
        drop(self.context.take());
    }

    /// Drop the session and context, then release and drop the model.
    async fn teardown(&mut self) {
        self.drop_session();
        if let Some(mut resident) = self.model.take() {
            if let Err(e) = resident.handle.release().await {
                warn!(model = %resident.id, error = %e, "model release failed");
            }
            debug!(model = %resident.id, "model disposed");
        }
    }
}

/// Exclusive access to the active chat session.
///
/// Holding this blocks every other session operation, including swaps.
pub struct ActiveSession<'a> {
    handle: SessionHandle,
    context_size: u32,
    chat: MappedMutexGuard<'a, dyn ChatSession>,
}

impl ActiveSession<'_> {
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Context window the session was created with, in tokens.
    pub fn context_size(&self) -> u32 {
        self.context_size
    }

    pub fn chat(&mut self) -> &mut dyn ChatSession {
        &mut *self.chat
    }
}

/// Owns the single loaded model and active session.
pub struct SessionManager {
    engine: Arc<dyn InferenceEngine>,
    slot: Mutex<Slot>,
    state: watch::Sender<SessionState>,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(engine: Arc<dyn InferenceEngine>, settings: SessionSettings) -> Self {
        let (state, _) = watch::channel(SessionState::Unloaded);
        Self {
            engine,
            slot: Mutex::new(Slot::default()),
            state,
            settings,
        }
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    /// Identifier of the resident model, if any.
    pub async fn loaded_model(&self) -> Option<String> {
        self.slot.lock().await.model.as_ref().map(|m| m.id.clone())
    }

    /// Create (or reuse) the session for `model` with `system_prompt` at the default context size.
    pub async fn create_session(
        &self,
        model: &str,
        system_prompt: &str,
    ) -> Result<SessionHandle, SessionError> {
        self.create_session_sized(model, system_prompt, self.settings.context_size)
            .await
    }

    /// Create a session for `persona`, composing its system prompt from `base_prompt`.
    pub async fn create_persona_session(
        &self,
        persona: &Persona,
        base_prompt: &str,
    ) -> Result<SessionHandle, SessionError> {
        let system_prompt = compose_system_prompt(persona, base_prompt);
        let context_size = persona
            .context_length
            .filter(|&n| n > 0)
            .unwrap_or(self.settings.context_size);
        self.create_session_sized(&persona.model, &system_prompt, context_size)
            .await
    }

    /// Create (or reuse) a session with an explicit context size.
    pub async fn create_session_sized(
        &self,
        model: &str,
        system_prompt: &str,
        context_size: u32,
    ) -> Result<SessionHandle, SessionError> {
        if model.trim().is_empty() {
            return Err(SessionError::MissingModel);
        }

        let mut slot = self.slot.lock().await;
        if let Some(handle) = slot.reusable(model, system_prompt, context_size) {
            debug!(model, session = %handle.id, "reusing existing session");
            return Ok(handle);
        }

        match self.rebuild(&mut slot, model, system_prompt, context_size).await {
            Ok(handle) => {
                self.set_state(SessionState::Ready);
                info!(model, session = %handle.id, context_size, "session ready");
                Ok(handle)
            }
            Err(e) => {
                warn!(model, error = %e, "session creation failed, unloading");
                slot.teardown().await;
                self.set_state(SessionState::Unloaded);
                Err(e)
            }
        }
    }

    async fn rebuild(
        &self,
        slot: &mut Slot,
        model: &str,
        system_prompt: &str,
        context_size: u32,
    ) -> Result<SessionHandle, SessionError> {
        let load_error = |source: EngineError| SessionError::Load {
            model: model.to_string(),
            source,
        };

        let resident_id = slot.model.as_ref().map(|m| m.id.clone());
        match resident_id {
            Some(current) if current != model => {
                info!(from = %current, to = model, "swapping model, disposing current model first");
                self.set_state(SessionState::Swapping);
                slot.teardown().await;
            }
            Some(_) => {
                info!(model, "same model, new prompt: recreating context");
                self.set_state(SessionState::RecreatingContext);
                slot.drop_session();
                tokio::time::sleep(self.settings.settle_delay).await;
            }
            None => {}
        }

        let resident = match slot.model.take() {
            Some(resident) => resident,
            None => {
                self.set_state(SessionState::Loading);
                let options = vision::plan_load(model);
                info!(model, gpu_layers = options.gpu_layers, "loading model");
                let handle = self.engine.load_model(options).await.map_err(load_error)?;
                Resident {
                    id: model.to_string(),
                    handle,
                }
            }
        };

        let built = build_session(resident.handle.as_ref(), system_prompt, context_size).await;
        slot.model = Some(resident);
        let (context, session) = built.map_err(load_error)?;

        let handle = SessionHandle {
            id: Uuid::new_v4(),
            model: model.to_string(),
        };
        slot.context = Some(context);
        slot.session = Some(session);
        slot.system_prompt = system_prompt.to_string();
        slot.context_size = context_size;
        slot.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Lock the active session for a generation.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotReady` if no session has been created.
    pub async fn lock_active(&self) -> Result<ActiveSession<'_>, SessionError> {
        let slot = self.slot.lock().await;
        let handle = slot.handle.clone().ok_or(SessionError::NotReady)?;
        let context_size = slot.context_size;
        let chat = MutexGuard::try_map(slot, |s| s.session.as_deref_mut())
            .map_err(|_| SessionError::NotReady)?;
        Ok(ActiveSession {
            handle,
            context_size,
            chat,
        })
    }

    /// Release the session, context, and model. Safe to call when nothing is loaded.
    pub async fn dispose(&self) {
        let mut slot = self.slot.lock().await;
        slot.teardown().await;
        self.set_state(SessionState::Unloaded);
        info!("session manager disposed");
    }
}

async fn build_session(
    model: &dyn LoadedModel,
    system_prompt: &str,
    context_size: u32,
) -> Result<(Box<dyn EngineContext>, Box<dyn ChatSession>), EngineError> {
    let context = model.create_context(context_size).await?;
    let session = context.create_session(system_prompt).await?;
    Ok((context, session))
}
