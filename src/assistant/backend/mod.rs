//! Persistence contract shared by the JSON-file and SQLite backends.
//!
//! Both implementations hold their state behind a single lock, so every method
//! is atomic with respect to every other call on the same backend. Callers
//! never need to know which one is active.

pub mod file;
pub mod sqlite;

use chrono::NaiveDate;

use crate::assistant::error::StorageError;
use crate::assistant::types::{
    ChatId, ChatInfo, ConversationHistory, ConversationTurn, QuotaKind, Role, UsageStats,
};

pub use file::JsonFileBackend;
pub use sqlite::SqliteBackend;

pub trait StateBackend: Send + Sync {
    /// Current history. A chat with no stored turns gets a system-only history
    /// built from its prompt override or the process default.
    fn history(&self, chat: ChatId) -> Result<ConversationHistory, StorageError>;

    /// Store a user or assistant turn with the next sequence number.
    fn append_turn(
        &self,
        chat: ChatId,
        role: Role,
        text: &str,
    ) -> Result<ConversationTurn, StorageError>;

    /// Drop the oldest non-system turns until at most `2 * max_turns` remain.
    /// Returns the number dropped.
    fn truncate(&self, chat: ChatId, max_turns: usize) -> Result<usize, StorageError>;

    /// Delete every non-system turn. A prompt override survives.
    fn reset_history(&self, chat: ChatId) -> Result<(), StorageError>;

    /// Set the prompt override and clear the history in one step.
    fn set_system_prompt(&self, chat: ChatId, text: &str) -> Result<(), StorageError>;

    /// Remove the prompt override and clear the history in one step.
    fn clear_system_prompt(&self, chat: ChatId) -> Result<(), StorageError>;

    fn system_prompt(&self, chat: ChatId) -> Result<Option<String>, StorageError>;

    /// Requests counted for `day`. A counter stored for another day reads as 0.
    fn quota_count(&self, chat: ChatId, kind: QuotaKind, day: NaiveDate)
        -> Result<u32, StorageError>;

    /// Atomically increment the counter for `day` unless it is already at `limit`.
    fn increment_quota_if_under(
        &self,
        chat: ChatId,
        kind: QuotaKind,
        day: NaiveDate,
        limit: u32,
    ) -> Result<bool, StorageError>;

    fn is_whitelisted(&self, chat: ChatId) -> Result<bool, StorageError>;

    /// Returns true if membership changed.
    fn set_whitelisted(&self, chat: ChatId, unlimited: bool) -> Result<bool, StorageError>;

    fn whitelisted(&self) -> Result<Vec<ChatId>, StorageError>;

    fn record_chat_info(&self, chat: ChatId, info: &ChatInfo) -> Result<(), StorageError>;

    fn chat_info(&self, chat: ChatId) -> Result<Option<ChatInfo>, StorageError>;

    fn stats(&self, day: NaiveDate) -> Result<UsageStats, StorageError>;
}

/// How many stored (non-system) turns to drop so at most `2 * max_turns` remain.
pub(crate) fn excess_turns(stored: usize, max_turns: usize) -> usize {
    stored.saturating_sub(2 * max_turns)
}
