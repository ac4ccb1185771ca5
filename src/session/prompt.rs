//! Persona description and system prompt composition.

use serde::{Deserialize, Serialize};

use crate::memory_types::{normalize_persona, RetrieveOptions, GLOBAL_PERSONA};

/// System prompt used when a persona supplies no text of its own.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a local AI assistant with no default name. \
Adopt the identity provided in the conversation logs. Use the current persona name if one exists.";

/// Keeps replies from opening with a speaker label.
pub const NO_NAME_PREFIX_DIRECTIVE: &str = "CRITICAL: Never prefix your response with your name, \
\"Assistant:\", or \"Insight:\". Start your response directly with dialogue or actions.";

/// Added when reasoning mode is off.
pub const ANSWER_DIRECTLY_DIRECTIVE: &str =
    "Answer directly. Do not write out your reasoning or wrap thoughts in <think> tags.";

/// A named assistant identity, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    /// Model identifier to load for this persona.
    pub model: String,
    /// Restrict memory retrieval to this persona plus "Global".
    #[serde(default)]
    pub isolate: bool,
    /// Context window in tokens; `None` uses the configured default.
    #[serde(default)]
    pub context_length: Option<u32>,
    /// Allow the model to emit visible reasoning blocks.
    #[serde(default)]
    pub reasoning: bool,
}

impl Persona {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            isolate: false,
            context_length: None,
            reasoning: false,
        }
    }

    pub fn retrieve_options(&self) -> RetrieveOptions {
        RetrieveOptions {
            persona: Some(normalize_persona(&self.name)),
            isolate: self.isolate,
        }
    }
}

/// Compose the system prompt for `persona` from its base text and the core directives.
///
/// Directives already present in the base text are not repeated.
pub fn compose_system_prompt(persona: &Persona, base: &str) -> String {
    let base = base.trim();
    let mut parts: Vec<String> = vec![if base.is_empty() {
        DEFAULT_SYSTEM_PROMPT.to_string()
    } else {
        base.to_string()
    }];

    let name = normalize_persona(&persona.name);
    if name != GLOBAL_PERSONA {
        parts.push(format!("Current persona name: {}.", name));
    }
    if !base.contains(NO_NAME_PREFIX_DIRECTIVE) {
        parts.push(NO_NAME_PREFIX_DIRECTIVE.to_string());
    }
    if !persona.reasoning {
        parts.push(ANSWER_DIRECTLY_DIRECTIVE.to_string());
    }
    parts.join("\n")
}
