//! Chat engine
//!
//! The ChatEngine sits between the platform channels and the active provider:
//! 1. Serializes turns per user so replies are recorded in arrival order
//! 2. Loads the user's bounded history
//! 3. Sends system prompt + history + new message to the provider
//! 4. Records the exchange on success
//! 5. Turns every provider failure into a fixed apology

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error};

use crate::conversation::{ConversationHistory, Turn, UserId};
use crate::providers::{ChatProvider, ProviderError};

use super::memory::ConversationStore;

/// Reply sent to the user whenever the provider call fails
pub const APOLOGY: &str =
    "Sorry, I encountered an error processing your message. Please try again.";

/// One async mutex per user, held for the whole of a chat turn
#[derive(Default)]
pub struct UserLocks {
    inner: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub async fn lock_user(&self, user_id: &UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(user_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Result of one chat turn: the text to send back, and whether the provider
/// produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    text: String,
    answered: bool,
}

impl Reply {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// False when the text is the apology
    pub fn answered(&self) -> bool {
        self.answered
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// The core chat engine
pub struct ChatEngine {
    provider: Arc<dyn ChatProvider>,
    memory: Arc<ConversationStore>,
    locks: UserLocks,
    system_prompt: String,
}

impl ChatEngine {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        memory: Arc<ConversationStore>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            memory,
            locks: UserLocks::default(),
            system_prompt: system_prompt.into(),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn apologize(&self, e: ProviderError) -> Reply {
        error!(provider = self.provider.name(), error = %e, "AI provider call failed");
        Reply {
            text: APOLOGY.to_string(),
            answered: false,
        }
    }

    /// Ask the provider for a reply. Never fails: errors become [`APOLOGY`].
    pub async fn chat(&self, message: &str, history: &ConversationHistory) -> Reply {
        let turns: Vec<Turn> = history.to_vec();
        match self
            .provider
            .chat(&self.system_prompt, &turns, message)
            .await
        {
            Ok(text) => Reply {
                text,
                answered: true,
            },
            Err(e) => self.apologize(e),
        }
    }

    /// Handle one inbound message from a user and return the reply text.
    ///
    /// The exchange is recorded only when the provider answered; a failed
    /// turn leaves the history untouched.
    pub async fn respond(&self, user_id: &UserId, message: &str) -> String {
        let _turn = self.locks.lock_user(user_id).await;

        let history = self.memory.history(user_id).await;
        if history.is_empty() {
            debug!(user = %user_id, "Starting new conversation");
        }
        debug!(user = %user_id, history_len = history.len(), "Dispatching chat turn");

        let reply = self.chat(message, &history).await;
        if reply.answered() {
            self.memory
                .append_exchange(user_id, message, reply.text())
                .await;
        }
        reply.into_text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Platform, Role};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Echoes the message back and records what it was sent
    #[derive(Default)]
    struct EchoProvider {
        calls: StdMutex<Vec<(String, Vec<Turn>, String)>>,
    }

    #[async_trait]
    impl ChatProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn chat(
            &self,
            system: &str,
            history: &[Turn],
            message: &str,
        ) -> Result<String, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push((system.to_string(), history.to_vec(), message.to_string()));
            Ok(format!("echo: {}", message))
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl ChatProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn chat(&self, _: &str, _: &[Turn], _: &str) -> Result<String, ProviderError> {
            Err(ProviderError::InvalidResponse("HTTP 429: rate limited".into()))
        }
    }

    /// Answers slowly the first time so a second turn could overtake it
    struct SlowFirstProvider {
        calls: StdMutex<usize>,
    }

    #[async_trait]
    impl ChatProvider for SlowFirstProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn chat(&self, _: &str, _: &[Turn], message: &str) -> Result<String, ProviderError> {
            let first = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls == 1
            };
            if first {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(format!("re: {}", message))
        }
    }

    fn engine(provider: Arc<dyn ChatProvider>) -> (ChatEngine, Arc<ConversationStore>) {
        let memory = Arc::new(ConversationStore::new());
        (ChatEngine::new(provider, memory.clone(), "system prompt"), memory)
    }

    #[tokio::test]
    async fn test_chat_returns_apology_on_failure() {
        let (engine, _) = engine(Arc::new(FailingProvider));
        let reply = engine.chat("hello", &ConversationHistory::default()).await;
        assert_eq!(reply.text(), APOLOGY);
        assert!(!reply.answered());
    }

    #[tokio::test]
    async fn test_chat_passes_history_and_marks_answer() {
        let provider = Arc::new(EchoProvider::default());
        let (engine, _) = engine(provider.clone());
        let mut history = ConversationHistory::default();
        history.push(Turn::user("earlier"));
        history.push(Turn::assistant("noted"));

        let reply = engine.chat("now", &history).await;
        assert!(reply.answered());
        assert_eq!(reply.into_text(), "echo: now");

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls[0].1, history.to_vec());
    }

    /// Provider whose answer happens to equal the apology text
    struct ApologeticProvider;

    #[async_trait]
    impl ChatProvider for ApologeticProvider {
        fn name(&self) -> &str {
            "apologetic"
        }

        async fn chat(&self, _: &str, _: &[Turn], _: &str) -> Result<String, ProviderError> {
            Ok(APOLOGY.to_string())
        }
    }

    #[tokio::test]
    async fn test_answered_apology_text_is_recorded() {
        let (engine, memory) = engine(Arc::new(ApologeticProvider));
        let user = UserId::new(Platform::Telegram, 9);

        assert_eq!(engine.respond(&user, "sorry?").await, APOLOGY);
        assert_eq!(memory.history(&user).await.len(), 2);
    }

    #[tokio::test]
    async fn test_respond_records_exchange() {
        let provider = Arc::new(EchoProvider::default());
        let (engine, memory) = engine(provider.clone());
        let user = UserId::new(Platform::Telegram, 42);

        assert_eq!(engine.respond(&user, "hi").await, "echo: hi");
        assert_eq!(engine.respond(&user, "again").await, "echo: again");

        let history = memory.history(&user).await.to_vec();
        assert_eq!(
            history,
            vec![
                Turn::user("hi"),
                Turn::assistant("echo: hi"),
                Turn::user("again"),
                Turn::assistant("echo: again"),
            ]
        );

        // Second call saw the first exchange as context, and the system prompt
        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls[1].0, "system prompt");
        assert_eq!(calls[1].1.len(), 2);
        assert_eq!(calls[1].2, "again");
    }

    #[tokio::test]
    async fn test_failed_exchange_records_nothing() {
        let (engine, memory) = engine(Arc::new(FailingProvider));
        let user = UserId::new(Platform::Slack, "U1");

        assert_eq!(engine.respond(&user, "hello?").await, APOLOGY);
        assert!(memory.history(&user).await.is_empty());
    }

    #[tokio::test]
    async fn test_context_is_bounded() {
        let provider = Arc::new(EchoProvider::default());
        let (engine, memory) = engine(provider.clone());
        let user = UserId::new(Platform::Discord, "7");

        for i in 0..15 {
            engine.respond(&user, &format!("m{}", i)).await;
        }

        let history = memory.history(&user).await.to_vec();
        assert_eq!(history.len(), 20);
        assert_eq!(history[0], Turn::user("m5"));
        assert_eq!(history[19].role, Role::Assistant);

        let calls = provider.calls.lock().unwrap();
        assert!(calls.iter().all(|(_, h, _)| h.len() <= 20));
    }

    #[tokio::test]
    async fn test_overlapping_turns_keep_arrival_order() {
        let provider = Arc::new(SlowFirstProvider {
            calls: StdMutex::new(0),
        });
        let (engine, memory) = engine(provider);
        let engine = Arc::new(engine);
        let user = UserId::new(Platform::Telegram, 5);

        let first = {
            let engine = engine.clone();
            let user = user.clone();
            tokio::spawn(async move { engine.respond(&user, "one").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = {
            let engine = engine.clone();
            let user = user.clone();
            tokio::spawn(async move { engine.respond(&user, "two").await })
        };

        assert_eq!(first.await.unwrap(), "re: one");
        assert_eq!(second.await.unwrap(), "re: two");

        let contents: Vec<String> = memory
            .history(&user)
            .await
            .iter()
            .map(|t| t.content.clone())
            .collect();
        assert_eq!(contents, vec!["one", "re: one", "two", "re: two"]);
    }
}
