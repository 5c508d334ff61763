//! Application configuration
//!
//! Everything is read from environment variables (optionally via `.env`).
//! Empty values are treated as unset.

pub mod prompts;

use std::env;
use std::path::PathBuf;

use crate::providers::Credentials;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENROUTER_MODEL: &str = "anthropic/claude-3.5-sonnet";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_AI_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    // Deployment identity
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub plan: Option<String>,
    pub deployment_id: Option<String>,

    // Platform credentials
    pub telegram_bot_token: Option<String>,
    pub discord_bot_token: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_app_token: Option<String>,

    // Provider credentials and models
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub ai_timeout_secs: u64,

    // System prompt sources
    pub system_prompt: Option<String>,
    pub persona_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup, e.g. a map in tests
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(get("PORT"), "PORT", DEFAULT_PORT)?,
            customer_email: get("CUSTOMER_EMAIL"),
            customer_name: get("CUSTOMER_NAME"),
            plan: get("PLAN"),
            deployment_id: get("DEPLOYMENT_ID"),
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN"),
            discord_bot_token: get("DISCORD_BOT_TOKEN"),
            slack_bot_token: get("SLACK_BOT_TOKEN"),
            slack_app_token: get("SLACK_APP_TOKEN"),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.into()),
            openrouter_api_key: get("OPENROUTER_API_KEY"),
            openrouter_model: get("OPENROUTER_MODEL")
                .unwrap_or_else(|| DEFAULT_OPENROUTER_MODEL.into()),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            anthropic_model: get("ANTHROPIC_MODEL")
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.into()),
            gemini_api_key: get("GOOGLE_API_KEY").or_else(|| get("GEMINI_API_KEY")),
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.into()),
            ai_timeout_secs: parse_or(
                get("AI_TIMEOUT_SECS"),
                "AI_TIMEOUT_SECS",
                DEFAULT_AI_TIMEOUT_SECS,
            )?,
            system_prompt: get("SYSTEM_PROMPT"),
            persona_file: get("PERSONA_FILE").map(PathBuf::from),
        })
    }

    /// Which provider credentials are configured
    pub fn credentials(&self) -> Credentials {
        Credentials {
            anthropic: self.anthropic_api_key.is_some(),
            openrouter: self.openrouter_api_key.is_some(),
            openai: self.openai_api_key.is_some(),
            gemini: self.gemini_api_key.is_some(),
        }
    }

    /// Customer shown on the status endpoint: name, falling back to email
    pub fn customer(&self) -> Option<&str> {
        self.customer_name
            .as_deref()
            .or(self.customer_email.as_deref())
    }

    /// Slack needs both the bot token and the Socket Mode app token
    pub fn slack_tokens(&self) -> Option<(&str, &str)> {
        match (&self.slack_bot_token, &self.slack_app_token) {
            (Some(bot), Some(app)) => Some((bot, app)),
            _ => None,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}
