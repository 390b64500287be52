use std::sync::Arc;

use tracing::info;

use super::backend::StateBackend;
use super::error::StorageError;
use super::types::ChatId;

/// Chats exempt from daily quotas. Every change is durable before it returns.
pub struct WhitelistRegistry {
    backend: Arc<dyn StateBackend>,
}

impl WhitelistRegistry {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self { backend }
    }

    /// Returns false if the chat was already unlimited.
    pub fn add(&self, chat: ChatId) -> Result<bool, StorageError> {
        let changed = self.backend.set_whitelisted(chat, true)?;
        if changed {
            info!("➕ Chat {} added to unlimited list", chat);
        }
        Ok(changed)
    }

    /// Returns false if the chat was not on the list.
    pub fn remove(&self, chat: ChatId) -> Result<bool, StorageError> {
        let changed = self.backend.set_whitelisted(chat, false)?;
        if changed {
            info!("➖ Chat {} removed from unlimited list", chat);
        }
        Ok(changed)
    }

    pub fn contains(&self, chat: ChatId) -> Result<bool, StorageError> {
        self.backend.is_whitelisted(chat)
    }

    pub fn list(&self) -> Result<Vec<ChatId>, StorageError> {
        self.backend.whitelisted()
    }
}
