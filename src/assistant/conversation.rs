//! Conversation log operations used around each completion call.

use std::sync::Arc;

use tracing::debug;

use super::backend::StateBackend;
use super::error::StorageError;
use super::types::{ChatId, ConversationHistory, ConversationTurn, Role};

pub struct ConversationStore {
    backend: Arc<dyn StateBackend>,
    max_turns: usize,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn StateBackend>, max_turns: usize) -> Self {
        Self { backend, max_turns }
    }

    /// Store the question and trim the log, returning what the provider should see.
    pub fn record_user_turn(
        &self,
        chat: ChatId,
        text: &str,
    ) -> Result<ConversationHistory, StorageError> {
        self.backend.append_turn(chat, Role::User, text)?;
        let dropped = self.backend.truncate(chat, self.max_turns)?;
        if dropped > 0 {
            debug!("Dropped {} old turns for chat {}", dropped, chat);
        }
        self.backend.history(chat)
    }

    pub fn record_assistant_turn(
        &self,
        chat: ChatId,
        text: &str,
    ) -> Result<ConversationTurn, StorageError> {
        self.backend.append_turn(chat, Role::Assistant, text)
    }

    /// New custom prompt; history restarts from it.
    pub fn set_prompt(&self, chat: ChatId, text: &str) -> Result<(), StorageError> {
        self.backend.set_system_prompt(chat, text)
    }

    /// Back to the default prompt with an empty history.
    pub fn reset(&self, chat: ChatId) -> Result<(), StorageError> {
        self.backend.clear_system_prompt(chat)
    }
}
