//! System prompt resolution
//!
//! The prompt sent ahead of every conversation comes from, in order:
//! 1. the `SYSTEM_PROMPT` variable
//! 2. the `[system_prompt]` section of the TOML file named by `PERSONA_FILE`
//! 3. the built-in default
//!
//! # Example Persona File
//!
//! ```toml
//! [persona]
//! name = "Support Desk"
//! description = "Front-line helper for Acme customers"
//!
//! [system_prompt]
//! content = """
//! You are the Acme support assistant...
//! """
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use super::Config;

/// A persona file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaFile {
    /// Persona metadata
    #[serde(default)]
    pub persona: PersonaInfo,

    /// The system prompt
    pub system_prompt: SystemPrompt,
}

/// Persona metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaInfo {
    /// Display name of the persona
    #[serde(default)]
    pub name: String,

    /// Brief description
    #[serde(default)]
    pub description: String,
}

/// System prompt content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPrompt {
    pub content: String,
}

impl PersonaFile {
    pub fn from_str(content: &str) -> Result<Self, PromptError> {
        toml::from_str(content).map_err(|e| PromptError::ParseError(e.to_string()))
    }

    pub async fn load(path: &Path) -> Result<Self, PromptError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PromptError::IoError(format!("{}: {}", path.display(), e)))?;

        Self::from_str(&content)
    }
}

/// Resolve the system prompt for this deployment
pub async fn resolve_system_prompt(config: &Config) -> Result<String, PromptError> {
    if let Some(prompt) = &config.system_prompt {
        return Ok(prompt.clone());
    }

    if let Some(path) = &config.persona_file {
        let persona = PersonaFile::load(path).await?;
        tracing::info!("🎭 Loaded persona '{}' from {}", persona.persona.name, path.display());
        let content = persona.system_prompt.content.trim();
        if content.is_empty() {
            return Err(PromptError::Empty(path.display().to_string()));
        }
        return Ok(content.to_string());
    }

    Ok(builtin::default_prompt(config.customer_name.as_deref()))
}

/// Errors from prompt loading
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Persona file has an empty system prompt: {0}")]
    Empty(String),
}

/// Built-in prompt used when nothing is configured
pub mod builtin {
    pub const DEFAULT: &str = "You are a helpful AI assistant. Answer clearly and concisely, and keep replies short enough to read comfortably in a chat window.";

    pub fn default_prompt(customer_name: Option<&str>) -> String {
        match customer_name {
            Some(name) => format!("{} You are deployed for {}.", DEFAULT, name),
            None => DEFAULT.to_string(),
        }
    }
}
