//! Telegram channel (teloxide long polling)
//!
//! Every text message is answered; the reply goes to the chat it came from.

use async_trait::async_trait;
use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::ChatAction};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::conversation::{Platform, UserId};

use super::{split_message, Channel, ChannelError, IncomingMessage};

/// Telegram's per-message text limit
pub const MAX_MESSAGE_LEN: usize = 4096;

pub struct TelegramChannel {
    bot: Bot,
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    fn chat_id(to: &IncomingMessage) -> Result<ChatId, ChannelError> {
        to.target
            .parse::<i64>()
            .map(ChatId)
            .map_err(|_| ChannelError::UnknownTarget(to.target.clone()))
    }
}

/// Build the relay message for a Telegram text update
fn incoming(user_id: u64, chat_id: i64, text: &str) -> Option<IncomingMessage> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    Some(IncomingMessage {
        channel: Platform::Telegram,
        user_id: UserId::new(Platform::Telegram, user_id),
        target: chat_id.to_string(),
        reply_to: None,
        text: text.to_string(),
    })
}

async fn on_message(msg: Message, tx: mpsc::Sender<IncomingMessage>) -> ResponseResult<()> {
    let (Some(user), Some(text)) = (msg.from(), msg.text()) else {
        return Ok(());
    };

    if let Some(incoming) = incoming(user.id.0, msg.chat.id.0, text) {
        if tx.send(incoming).await.is_err() {
            warn!("Dispatcher queue closed; dropping Telegram message");
        }
    }
    Ok(())
}

#[async_trait]
impl Channel for TelegramChannel {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    async fn listen(&self, tx: mpsc::Sender<IncomingMessage>) -> Result<(), ChannelError> {
        let me = self.bot.get_me().await?;
        info!("🤖 Telegram bot connected as @{}", me.username());

        let handler = Update::filter_message().endpoint(on_message);

        Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![tx])
            .build()
            .dispatch()
            .await;

        Ok(())
    }

    async fn send(&self, to: &IncomingMessage, text: &str) -> Result<(), ChannelError> {
        let chat_id = Self::chat_id(to)?;
        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            self.bot.send_message(chat_id, chunk).await?;
        }
        Ok(())
    }

    async fn start_typing(&self, to: &IncomingMessage) -> Result<(), ChannelError> {
        let chat_id = Self::chat_id(to)?;
        self.bot
            .send_chat_action(chat_id, ChatAction::Typing)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incoming_uses_platform_scoped_user() {
        let msg = incoming(42, -100123, "  hello bot ").unwrap();

        assert_eq!(msg.user_id.as_str(), "telegram:42");
        assert_eq!(msg.target, "-100123");
        assert_eq!(msg.text, "hello bot");
        assert!(msg.reply_to.is_none());
    }

    #[test]
    fn test_blank_text_is_ignored() {
        assert!(incoming(1, 1, "   ").is_none());
    }

    #[test]
    fn test_chat_id_must_be_numeric() {
        let mut msg = incoming(1, 77, "hi").unwrap();
        assert_eq!(TelegramChannel::chat_id(&msg).unwrap(), ChatId(77));

        msg.target = "general".into();
        assert!(matches!(
            TelegramChannel::chat_id(&msg),
            Err(ChannelError::UnknownTarget(_))
        ));
    }
}
