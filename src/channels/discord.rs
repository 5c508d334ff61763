//! Discord channel
//!
//! Receives messages over the gateway websocket and replies through the REST
//! API. Only direct messages and messages that mention the bot are answered.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use crate::conversation::{Platform, UserId};

use super::{split_message, Channel, ChannelError, IncomingMessage};

const API_BASE: &str = "https://discord.com/api/v10";
const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Discord's per-message content limit
pub const MAX_MESSAGE_LEN: usize = 2000;

// Gateway intents
const GUILDS: u64 = 1 << 0;
const GUILD_MESSAGES: u64 = 1 << 9;
const DIRECT_MESSAGES: u64 = 1 << 12;
const MESSAGE_CONTENT: u64 = 1 << 15;
const INTENTS: u64 = GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT;

// Gateway opcodes
const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct DiscordMessage {
    id: String,
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    author: DiscordUser,
    #[serde(default)]
    content: String,
    #[serde(default)]
    mentions: Vec<DiscordUser>,
}

pub struct DiscordChannel {
    token: String,
    http: Client,
}

impl DiscordChannel {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            http: Client::new(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token)
    }

    fn identify(&self) -> Value {
        json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.token,
                "intents": INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": env!("CARGO_PKG_NAME"),
                    "device": env!("CARGO_PKG_NAME"),
                }
            }
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<(), ChannelError> {
        let response = self
            .http
            .post(format!("{}{}", API_BASE, path))
            .header("Authorization", self.auth_header())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Protocol(format!("HTTP {}: {}", status, body)));
        }
        Ok(())
    }
}

/// Remove the bot's own mention markup (`<@id>`, `<@!id>`) from message content.
///
/// Other mentions and all interior whitespace are kept as sent.
pub fn strip_mentions(content: &str, bot_id: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("<@") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let digits = after.strip_prefix('!').unwrap_or(after);
        let id_len = digits.bytes().take_while(|b| b.is_ascii_digit()).count();

        if id_len > 0 && &digits[..id_len] == bot_id && digits[id_len..].starts_with('>') {
            rest = &digits[id_len + 1..];
        } else {
            out.push_str("<@");
            rest = after;
        }
    }
    out.push_str(rest);

    out.trim().to_string()
}

/// Decide whether a gateway message is for us and build the relay message
fn incoming(message: DiscordMessage, bot_id: &str) -> Option<IncomingMessage> {
    if message.author.bot || message.author.id == bot_id {
        return None;
    }

    let is_dm = message.guild_id.is_none();
    let mentioned = message.mentions.iter().any(|u| u.id == bot_id);
    if !is_dm && !mentioned {
        return None;
    }

    let text = strip_mentions(&message.content, bot_id);
    if text.is_empty() {
        return None;
    }

    Some(IncomingMessage {
        channel: Platform::Discord,
        user_id: UserId::new(Platform::Discord, &message.author.id),
        target: message.channel_id,
        reply_to: Some(message.id),
        text,
    })
}

#[async_trait]
impl Channel for DiscordChannel {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    async fn listen(&self, tx: mpsc::Sender<IncomingMessage>) -> Result<(), ChannelError> {
        let (ws, _) = connect_async(GATEWAY_URL).await?;
        let (mut write, mut read) = ws.split();

        // The gateway opens with Hello, carrying the heartbeat interval
        let hello: GatewayPayload = loop {
            match read.next().await {
                Some(Ok(WsMessage::Text(text))) => break serde_json::from_str(&text)?,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(ChannelError::Protocol("gateway closed before hello".into())),
            }
        };
        if hello.op != OP_HELLO {
            return Err(ChannelError::Protocol(format!(
                "expected hello, got op {}",
                hello.op
            )));
        }
        let interval_ms = hello.d["heartbeat_interval"]
            .as_u64()
            .ok_or_else(|| ChannelError::Protocol("hello without heartbeat_interval".into()))?;

        write
            .send(WsMessage::Text(self.identify().to_string()))
            .await?;

        let mut heartbeat = tokio::time::interval(Duration::from_millis(interval_ms));
        heartbeat.tick().await;

        let mut sequence: Option<u64> = None;
        let mut bot_id: Option<String> = None;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let beat = json!({ "op": OP_HEARTBEAT, "d": sequence });
                    write.send(WsMessage::Text(beat.to_string())).await?;
                }
                frame = read.next() => {
                    let text = match frame {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Close(frame))) => {
                            warn!(?frame, "Discord gateway closed the connection");
                            return Ok(());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                    };

                    let payload: GatewayPayload = serde_json::from_str(&text)?;
                    if payload.s.is_some() {
                        sequence = payload.s;
                    }

                    match payload.op {
                        OP_DISPATCH => match payload.t.as_deref() {
                            Some("READY") => {
                                bot_id = payload.d["user"]["id"].as_str().map(str::to_string);
                                info!(
                                    "🤖 Discord bot connected as {}",
                                    payload.d["user"]["username"].as_str().unwrap_or("unknown")
                                );
                            }
                            Some("MESSAGE_CREATE") => {
                                let Some(bot_id) = bot_id.as_deref() else {
                                    continue;
                                };
                                let message: DiscordMessage = match serde_json::from_value(payload.d) {
                                    Ok(message) => message,
                                    Err(e) => {
                                        debug!(error = %e, "Skipping unparseable Discord message");
                                        continue;
                                    }
                                };
                                if let Some(incoming) = incoming(message, bot_id) {
                                    if tx.send(incoming).await.is_err() {
                                        return Ok(());
                                    }
                                }
                            }
                            _ => {}
                        },
                        OP_HEARTBEAT => {
                            let beat = json!({ "op": OP_HEARTBEAT, "d": sequence });
                            write.send(WsMessage::Text(beat.to_string())).await?;
                        }
                        OP_RECONNECT => {
                            info!("Discord gateway requested reconnect");
                            return Ok(());
                        }
                        OP_INVALID_SESSION => {
                            return Err(ChannelError::Protocol("invalid gateway session".into()));
                        }
                        OP_HEARTBEAT_ACK => {}
                        other => debug!(op = other, "Ignoring gateway opcode"),
                    }
                }
            }
        }
    }

    async fn send(&self, to: &IncomingMessage, text: &str) -> Result<(), ChannelError> {
        let path = format!("/channels/{}/messages", to.target);

        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            let mut body = json!({ "content": chunk });
            if let Some(message_id) = &to.reply_to {
                body["message_reference"] = json!({
                    "message_id": message_id,
                    "fail_if_not_exists": false,
                });
            }
            self.post(&path, &body).await?;
        }
        Ok(())
    }

    async fn start_typing(&self, to: &IncomingMessage) -> Result<(), ChannelError> {
        self.post(&format!("/channels/{}/typing", to.target), &json!({}))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT_ID: &str = "900";

    fn message(json: Value) -> DiscordMessage {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_intents_include_message_content() {
        assert_eq!(INTENTS, 37377);
    }

    #[test]
    fn test_strip_mentions() {
        assert_eq!(strip_mentions("<@900> hello there", BOT_ID), "hello there");
        assert_eq!(strip_mentions("hey <@!900>, what's up?", BOT_ID), "hey , what's up?");
        assert_eq!(strip_mentions("<@1> and <@900> hi", BOT_ID), "<@1> and  hi");
        assert_eq!(
            strip_mentions("email me <@ not a mention", BOT_ID),
            "email me <@ not a mention"
        );
        assert_eq!(strip_mentions("<@&55> role ping", BOT_ID), "<@&55> role ping");
        assert_eq!(strip_mentions("<@9001> close call", BOT_ID), "<@9001> close call");
    }

    #[test]
    fn test_strip_mentions_keeps_multiline_body() {
        let content = "<@900> fix this:\n```\nfn main() {\n    println!(\"hi\");\n}\n```";
        assert_eq!(
            strip_mentions(content, BOT_ID),
            "fix this:\n```\nfn main() {\n    println!(\"hi\");\n}\n```"
        );
    }

    #[test]
    fn test_direct_message_is_answered() {
        let msg = message(json!({
            "id": "m1",
            "channel_id": "dm-1",
            "author": { "id": "42", "username": "alice" },
            "content": "what's the time?"
        }));

        let incoming = incoming(msg, BOT_ID).unwrap();
        assert_eq!(incoming.user_id.as_str(), "discord:42");
        assert_eq!(incoming.target, "dm-1");
        assert_eq!(incoming.reply_to.as_deref(), Some("m1"));
        assert_eq!(incoming.text, "what's the time?");
    }

    #[test]
    fn test_guild_message_needs_mention() {
        let unmentioned = message(json!({
            "id": "m2",
            "channel_id": "general",
            "guild_id": "g1",
            "author": { "id": "42" },
            "content": "talking to friends"
        }));
        assert!(incoming(unmentioned, BOT_ID).is_none());

        let mentioned = message(json!({
            "id": "m3",
            "channel_id": "general",
            "guild_id": "g1",
            "author": { "id": "42" },
            "content": "<@900> summarize this",
            "mentions": [{ "id": "900", "bot": true }]
        }));
        assert_eq!(incoming(mentioned, BOT_ID).unwrap().text, "summarize this");
    }

    #[test]
    fn test_bots_and_empty_mentions_are_ignored() {
        let from_bot = message(json!({
            "id": "m4",
            "channel_id": "dm-2",
            "author": { "id": "77", "bot": true },
            "content": "beep"
        }));
        assert!(incoming(from_bot, BOT_ID).is_none());

        let bare_mention = message(json!({
            "id": "m5",
            "channel_id": "general",
            "guild_id": "g1",
            "author": { "id": "42" },
            "content": "<@900>",
            "mentions": [{ "id": "900" }]
        }));
        assert!(incoming(bare_mention, BOT_ID).is_none());
    }

    #[test]
    fn test_gateway_payload_parses_dispatch() {
        let payload: GatewayPayload = serde_json::from_str(
            r#"{"op":0,"s":3,"t":"MESSAGE_CREATE","d":{"id":"1"}}"#,
        )
        .unwrap();
        assert_eq!(payload.op, OP_DISPATCH);
        assert_eq!(payload.s, Some(3));
        assert_eq!(payload.t.as_deref(), Some("MESSAGE_CREATE"));

        let ack: GatewayPayload = serde_json::from_str(r#"{"op":11}"#).unwrap();
        assert_eq!(ack.op, OP_HEARTBEAT_ACK);
        assert!(ack.d.is_null());
    }
}
