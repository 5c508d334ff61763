//! Core relay components
//!
//! This module holds the conversation memory and the chat engine that every
//! platform channel goes through.

mod chat;
mod memory;

pub use chat::ChatEngine;
#[cfg(test)]
pub use chat::APOLOGY;
pub use memory::ConversationStore;
