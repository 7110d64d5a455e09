//! Sessions module - durable conversation history.
//!
//! A session is a directory holding an append-only `history.jsonl`
//! (one [`Message`] per line) and a small `metadata.toml` record.
//! [`ChatMessageStore`] is the interface the agent writes through; the
//! in-memory store backs tests and `--no-session` runs.

mod jsonl;
mod manager;
mod session;

pub use jsonl::JsonlStore;
pub use manager::SessionManager;
pub use session::{Metadata, Session};

use std::sync::Mutex;

use crate::agent::Message;
use crate::Result;

/// Ordered, durable log of conversation messages.
///
/// Mutating operations on one store are serialized.
pub trait ChatMessageStore: Send + Sync {
    /// Append one message.
    fn add_chat_message(&self, message: &Message) -> Result<()>;

    /// Atomically replace the whole log.
    fn set_chat_messages(&self, messages: &[Message]) -> Result<()>;

    /// All messages in append order. Records that fail to decode are skipped.
    fn chat_messages(&self) -> Vec<Message>;

    /// Atomically truncate the log.
    fn clear_chat_messages(&self) -> Result<()>;
}

/// In-memory store for testing and ephemeral runs
#[derive(Default)]
pub struct InMemoryChatStore {
    messages: Mutex<Vec<Message>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChatMessageStore for InMemoryChatStore {
    fn add_chat_message(&self, message: &Message) -> Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        Ok(())
    }

    fn set_chat_messages(&self, messages: &[Message]) -> Result<()> {
        *self.messages.lock().unwrap_or_else(|e| e.into_inner()) = messages.to_vec();
        Ok(())
    }

    fn chat_messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn clear_chat_messages(&self) -> Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }
}
