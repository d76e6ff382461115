//! Session configuration for chat-cli.
//!
//! Configuration comes from the environment (`GROQ_API_KEY`, `GROQ_MODEL`)
//! and the `--verbose` switch. It is built once at startup and never changes.

use crate::error::ChatError;
use std::fmt;

/// Environment variable holding the API credential.
pub const API_KEY_VAR: &str = "GROQ_API_KEY";

/// Environment variable selecting the model by short name.
pub const MODEL_VAR: &str = "GROQ_MODEL";

/// OpenAI-compatible endpoint served by Groq.
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Sampling temperature sent with every request.
pub const TEMPERATURE: f32 = 0.7;

/// Instruction seeded as the first turn of every transcript.
pub const SYSTEM_PROMPT: &str = "Provide helpful and concise responses";

/// Models the client is allowed to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Model {
    #[default]
    LlamaInstant,
    Llama70b,
    Mixtral,
}

impl Model {
    /// Every supported model, default first.
    pub const ALL: [Model; 3] = [Model::LlamaInstant, Model::Llama70b, Model::Mixtral];

    /// Short name accepted in `GROQ_MODEL`.
    pub fn short_name(self) -> &'static str {
        match self {
            Model::LlamaInstant => "llama-instant",
            Model::Llama70b => "llama-70b",
            Model::Mixtral => "mixtral",
        }
    }

    /// Full model identifier sent to the API.
    pub fn id(self) -> &'static str {
        match self {
            Model::LlamaInstant => "llama-3.1-8b-instant",
            Model::Llama70b => "llama3-70b-8192",
            Model::Mixtral => "mixtral-8x7b-32768",
        }
    }

    /// Look up a model by its short name. Matching is exact.
    pub fn from_short_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.short_name() == name)
    }

    /// Resolve an optional selector, falling back to the default model.
    pub fn resolve(selector: Option<&str>) -> Self {
        selector.and_then(Self::from_short_name).unwrap_or_default()
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// API credential. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Immutable settings for one chat session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: Model,
    pub api_key: ApiKey,
    pub base_url: String,
    pub temperature: f32,
    pub verbose: bool,
}

impl SessionConfig {
    /// Build the configuration from the process environment.
    pub fn from_env(verbose: bool) -> Result<Self, ChatError> {
        Self::from_vars(
            std::env::var(API_KEY_VAR).ok(),
            std::env::var(MODEL_VAR).ok(),
            verbose,
        )
    }

    /// Build the configuration from already-read variable values.
    ///
    /// An empty credential counts as missing. An unknown or absent model
    /// selector resolves to [`Model::default`].
    pub fn from_vars(
        api_key: Option<String>,
        model: Option<String>,
        verbose: bool,
    ) -> Result<Self, ChatError> {
        let api_key = api_key
            .filter(|key| !key.is_empty())
            .map(ApiKey)
            .ok_or(ChatError::MissingCredential { var: API_KEY_VAR })?;

        Ok(Self {
            model: Model::resolve(model.as_deref()),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: TEMPERATURE,
            verbose,
        })
    }
}
