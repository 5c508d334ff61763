//! Slack channel (Socket Mode)
//!
//! Opens a websocket with the app-level token, acknowledges every envelope,
//! and answers plain `message` events in the channel they were posted in.
//! Edits, joins and other subtyped events are ignored, as are bot messages.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info};

use crate::conversation::{Platform, UserId};

use super::{split_message, Channel, ChannelError, IncomingMessage};

const API_BASE: &str = "https://slack.com/api";

/// Slack truncates very long messages; keep well below its limit
pub const MAX_MESSAGE_LEN: usize = 4000;

/// Socket Mode frame
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SlackEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// Common shape of Web API responses
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl ApiResponse {
    fn into_result(self, method: &str) -> Result<Self, ChannelError> {
        if self.ok {
            Ok(self)
        } else {
            Err(ChannelError::Protocol(format!(
                "{} failed: {}",
                method,
                self.error.as_deref().unwrap_or("unknown error")
            )))
        }
    }
}

pub struct SlackChannel {
    bot_token: String,
    app_token: String,
    http: Client,
}

impl SlackChannel {
    pub fn new(bot_token: impl Into<String>, app_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            app_token: app_token.into(),
            http: Client::new(),
        }
    }

    async fn call(
        &self,
        method: &str,
        token: &str,
        body: &Value,
    ) -> Result<ApiResponse, ChannelError> {
        let response: ApiResponse = self
            .http
            .post(format!("{}/{}", API_BASE, method))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?
            .json()
            .await?;

        response.into_result(method)
    }

    /// Ask Slack for a fresh Socket Mode URL
    async fn open_connection(&self) -> Result<String, ChannelError> {
        self.call("apps.connections.open", &self.app_token, &json!({}))
            .await?
            .url
            .ok_or_else(|| ChannelError::Protocol("apps.connections.open returned no url".into()))
    }
}

/// Build the relay message for an Events API payload, if it is one we answer
fn incoming(payload: &Value) -> Option<IncomingMessage> {
    let event: SlackEvent = serde_json::from_value(payload.get("event")?.clone()).ok()?;

    if event.kind != "message" || event.subtype.is_some() || event.bot_id.is_some() {
        return None;
    }

    let text = event.text?.trim().to_string();
    if text.is_empty() {
        return None;
    }

    Some(IncomingMessage {
        channel: Platform::Slack,
        user_id: UserId::new(Platform::Slack, event.user?),
        target: event.channel?,
        reply_to: None,
        text,
    })
}

#[async_trait]
impl Channel for SlackChannel {
    fn platform(&self) -> Platform {
        Platform::Slack
    }

    async fn listen(&self, tx: mpsc::Sender<IncomingMessage>) -> Result<(), ChannelError> {
        let url = self.open_connection().await?;
        let (ws, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws.split();

        while let Some(frame) = read.next().await {
            let text = match frame? {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => return Ok(()),
                _ => continue,
            };

            let envelope: Envelope = match serde_json::from_str(&text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    debug!(error = %e, "Skipping unparseable Socket Mode frame");
                    continue;
                }
            };

            if let Some(id) = &envelope.envelope_id {
                let ack = json!({ "envelope_id": id });
                write.send(WsMessage::Text(ack.to_string())).await?;
            }

            match envelope.kind.as_str() {
                "hello" => info!("🤖 Slack Socket Mode connected"),
                "disconnect" => {
                    info!("Slack requested reconnect");
                    return Ok(());
                }
                "events_api" => {
                    let Some(message) = envelope.payload.as_ref().and_then(incoming) else {
                        continue;
                    };
                    if tx.send(message).await.is_err() {
                        return Ok(());
                    }
                }
                other => debug!(kind = other, "Ignoring Socket Mode envelope"),
            }
        }

        Ok(())
    }

    async fn send(&self, to: &IncomingMessage, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            let body = json!({ "channel": to.target, "text": chunk });
            self.call("chat.postMessage", &self.bot_token, &body).await?;
        }
        Ok(())
    }
}
