//! AI provider integrations
//!
//! Exactly one provider is active per process. [`ProviderChoice::select`] picks
//! it from the configured credentials at startup, and [`from_choice`] builds the
//! matching client.

mod anthropic;
mod gemini;
mod openai_compat;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::Config;
use crate::conversation::Turn;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai_compat::{OpenAICompatConfig, OpenAICompatProvider};

/// Upper bound on generated tokens, shared by every provider
pub const MAX_TOKENS: u32 = 1024;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(
        "No AI provider configured. Set ANTHROPIC_API_KEY, OPENROUTER_API_KEY, \
         OPENAI_API_KEY or GOOGLE_API_KEY"
    )]
    NoCredentials,

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Empty response from provider")]
    EmptyResponse,
}

/// Which provider credentials are present
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Credentials {
    pub anthropic: bool,
    pub openrouter: bool,
    pub openai: bool,
    pub gemini: bool,
}

/// The active AI backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderChoice {
    OpenAI,
    OpenRouter,
    Anthropic,
    Gemini,
    None,
}

impl ProviderChoice {
    /// Pick the highest-precedence provider with a credential:
    /// Anthropic, then OpenRouter, then OpenAI, then Gemini.
    pub fn select(credentials: &Credentials) -> Self {
        if credentials.anthropic {
            ProviderChoice::Anthropic
        } else if credentials.openrouter {
            ProviderChoice::OpenRouter
        } else if credentials.openai {
            ProviderChoice::OpenAI
        } else if credentials.gemini {
            ProviderChoice::Gemini
        } else {
            ProviderChoice::None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderChoice::OpenAI => "openai",
            ProviderChoice::OpenRouter => "openrouter",
            ProviderChoice::Anthropic => "anthropic",
            ProviderChoice::Gemini => "gemini",
            ProviderChoice::None => "none",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ProviderChoice::None)
    }
}

impl fmt::Display for ProviderChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat-completion backend.
///
/// Implementations receive the system prompt, the prior turns and the new
/// user message, and return the text of the first completion.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name used in logs
    fn name(&self) -> &str;

    async fn chat(
        &self,
        system: &str,
        history: &[Turn],
        message: &str,
    ) -> Result<String, ProviderError>;
}

/// Build the client for the selected provider
pub fn from_choice(
    choice: ProviderChoice,
    config: &Config,
) -> Result<Arc<dyn ChatProvider>, ProviderError> {
    let missing = || ProviderError::NotConfigured(choice.to_string());

    let provider: Arc<dyn ChatProvider> = match choice {
        ProviderChoice::OpenAI => {
            let key = config.openai_api_key.clone().ok_or_else(missing)?;
            Arc::new(OpenAICompatProvider::new(OpenAICompatConfig::openai(
                key,
                &config.openai_model,
                config.ai_timeout_secs,
            ))?)
        }
        ProviderChoice::OpenRouter => {
            let key = config.openrouter_api_key.clone().ok_or_else(missing)?;
            Arc::new(OpenAICompatProvider::new(OpenAICompatConfig::openrouter(
                key,
                &config.openrouter_model,
                config.ai_timeout_secs,
            ))?)
        }
        ProviderChoice::Anthropic => {
            let key = config.anthropic_api_key.clone().ok_or_else(missing)?;
            Arc::new(AnthropicProvider::new(
                key,
                config.anthropic_model.clone(),
                config.ai_timeout_secs,
            )?)
        }
        ProviderChoice::Gemini => {
            let key = config.gemini_api_key.clone().ok_or_else(missing)?;
            Arc::new(GeminiProvider::new(
                key,
                config.gemini_model.clone(),
                config.ai_timeout_secs,
            )?)
        }
        ProviderChoice::None => return Err(missing()),
    };

    Ok(provider)
}

/// Select the provider for this process and build its client.
///
/// Fails with [`ProviderError::NoCredentials`] when no key is configured;
/// startup treats that as fatal.
pub fn activate(
    config: &Config,
) -> Result<(ProviderChoice, Arc<dyn ChatProvider>), ProviderError> {
    let choice = ProviderChoice::select(&config.credentials());
    if choice.is_none() {
        return Err(ProviderError::NoCredentials);
    }

    Ok((choice, from_choice(choice, config)?))
}

/// Pull a human-readable message out of a vendor error body
pub(crate) fn error_detail(status: reqwest::StatusCode, body: &str) -> String {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(|m| m.to_string())
        });

    match message {
        Some(message) => format!("API error ({}): {}", status, message),
        None => format!("HTTP {}: {}", status, body),
    }
}
