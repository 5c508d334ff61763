//! Platform channels
//!
//! Each channel owns one long-lived connection to a chat platform. Listeners
//! push [`IncomingMessage`]s into a shared queue; the dispatcher hands every
//! message to the [`ChatEngine`] on its own task and sends the reply back
//! through the channel it came from.

pub mod discord;
pub mod slack;
pub mod telegram;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::conversation::{Platform, UserId};
use crate::core::ChatEngine;

pub use discord::DiscordChannel;
pub use slack::SlackChannel;
pub use telegram::TelegramChannel;

/// Pause before a dropped listener reconnects
const LISTENER_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Queue depth between listeners and the dispatcher
const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unknown reply target: {0}")]
    UnknownTarget(String),
}

/// A user message received from any platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub channel: Platform,
    /// Conversation key, e.g. `discord:1234`
    pub user_id: UserId,
    /// Platform conversation to answer in (chat id / channel id)
    pub target: String,
    /// Platform message id to thread the reply under, when supported
    pub reply_to: Option<String>,
    pub text: String,
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn platform(&self) -> Platform;

    /// Run until the connection ends, forwarding user messages to `tx`
    async fn listen(&self, tx: mpsc::Sender<IncomingMessage>) -> Result<(), ChannelError>;

    /// Deliver a reply to the conversation `to` came from
    async fn send(&self, to: &IncomingMessage, text: &str) -> Result<(), ChannelError>;

    /// Show a typing indicator, where the platform has one
    async fn start_typing(&self, _to: &IncomingMessage) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Build every channel whose credentials are configured
pub fn from_config(config: &Config) -> Vec<Arc<dyn Channel>> {
    let mut channels: Vec<Arc<dyn Channel>> = Vec::new();

    match &config.telegram_bot_token {
        Some(token) => channels.push(Arc::new(TelegramChannel::new(token.clone()))),
        None => info!("TELEGRAM_BOT_TOKEN not set; Telegram disabled"),
    }

    match &config.discord_bot_token {
        Some(token) => channels.push(Arc::new(DiscordChannel::new(token.clone()))),
        None => info!("DISCORD_BOT_TOKEN not set; Discord disabled"),
    }

    match config.slack_tokens() {
        Some((bot, app)) => channels.push(Arc::new(SlackChannel::new(bot, app))),
        None => info!("SLACK_BOT_TOKEN/SLACK_APP_TOKEN not set; Slack disabled"),
    }

    channels
}

fn spawn_supervised_listener(
    ch: Arc<dyn Channel>,
    tx: mpsc::Sender<IncomingMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let result = ch.listen(tx.clone()).await;

            if tx.is_closed() {
                break;
            }

            match result {
                Ok(()) => warn!("Channel {} disconnected; reconnecting", ch.platform()),
                Err(e) => error!("Channel {} error: {e}; reconnecting", ch.platform()),
            }

            tokio::time::sleep(LISTENER_RESTART_DELAY).await;
        }
    })
}

/// Start every listener and dispatch their messages until shutdown
pub async fn run(channels: Vec<Arc<dyn Channel>>, engine: Arc<ChatEngine>) {
    let (tx, mut rx) = mpsc::channel(QUEUE_CAPACITY);

    let mut routes: HashMap<Platform, Arc<dyn Channel>> = HashMap::new();
    for ch in channels {
        info!("📡 Starting {} channel", ch.platform());
        spawn_supervised_listener(ch.clone(), tx.clone());
        routes.insert(ch.platform(), ch);
    }
    drop(tx);

    while let Some(msg) = rx.recv().await {
        let Some(channel) = routes.get(&msg.channel).cloned() else {
            warn!("No channel registered for {}", msg.channel);
            continue;
        };
        let engine = engine.clone();
        tokio::spawn(handle_message(channel, engine, msg));
    }
}

/// Answer one message: typing indicator, chat turn, reply delivery
pub async fn handle_message(
    channel: Arc<dyn Channel>,
    engine: Arc<ChatEngine>,
    msg: IncomingMessage,
) {
    let request_id = Uuid::new_v4();
    let span = info_span!("message", %request_id, user = %msg.user_id);

    async move {
        info!(chars = msg.text.chars().count(), "Message received");

        if let Err(e) = channel.start_typing(&msg).await {
            debug!(error = %e, "Typing indicator failed");
        }

        let reply = engine.respond(&msg.user_id, &msg.text).await;

        match channel.send(&msg, &reply).await {
            Ok(()) => info!("Reply delivered"),
            Err(e) => error!(error = %e, "Failed to deliver reply"),
        }
    }
    .instrument(span)
    .await
}

/// Split `text` into chunks of at most `limit` characters.
///
/// Prefers breaking after the last newline, then the last space, inside each
/// window; falls back to a hard cut. Concatenating the chunks gives back the
/// original text.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.chars().count() > limit {
        let window_end = remaining
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let window = &remaining[..window_end];

        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .map(|i| i + 1)
            .unwrap_or(window_end);

        chunks.push(remaining[..split_at].to_string());
        remaining = &remaining[split_at..];
    }

    if !remaining.is_empty() {
        chunks.push(remaining.to_string());
    }
    chunks
}
