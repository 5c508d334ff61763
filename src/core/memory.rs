//! In-process conversation memory
//!
//! Holds the bounded history of every user seen since startup. Nothing is
//! persisted; histories are dropped when the process exits.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::conversation::{ConversationHistory, Role, Turn, UserId};

/// Conversation store shared by every channel
#[derive(Debug, Default)]
pub struct ConversationStore {
    histories: RwLock<HashMap<UserId, ConversationHistory>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a user's history, creating an empty one on first sight
    pub async fn history(&self, user_id: &UserId) -> ConversationHistory {
        if let Some(history) = self.histories.read().await.get(user_id) {
            return history.clone();
        }

        self.histories
            .write()
            .await
            .entry(user_id.clone())
            .or_default()
            .clone()
    }

    /// Append one turn, trimming the oldest turns past the retention bound
    pub async fn append(&self, user_id: &UserId, role: Role, content: impl Into<String>) {
        self.histories
            .write()
            .await
            .entry(user_id.clone())
            .or_default()
            .push(Turn::new(role, content));
    }

    /// Record a completed exchange: the user's message, then the reply.
    ///
    /// Callers hold the user's turn lock, so nothing lands between the two.
    pub async fn append_exchange(&self, user_id: &UserId, message: &str, reply: &str) {
        self.append(user_id, Role::User, message).await;
        self.append(user_id, Role::Assistant, reply).await;
    }

    /// Number of users with a history
    pub async fn len(&self) -> usize {
        self.histories.read().await.len()
    }
}
