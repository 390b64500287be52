//! Core data types shared by the state backends and the request workflow.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Telegram chat identifier (positive = user / private chat, negative = group or channel).
pub type ChatId = i64;

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a chat's conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    /// Per-chat ordinal. The system turn is always 0; stored turns start at 1
    /// and are never reused.
    #[serde(default)]
    pub sequence: u64,
}

impl ConversationTurn {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
            sequence: 0,
        }
    }
}

/// Ordered history of one chat: the system turn first, then user/assistant turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationHistory {
    pub chat: ChatId,
    pub turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new(chat: ChatId, system_prompt: &str, rest: Vec<ConversationTurn>) -> Self {
        let mut turns = Vec::with_capacity(rest.len() + 1);
        turns.push(ConversationTurn::system(system_prompt));
        turns.extend(rest);
        Self { chat, turns }
    }

    /// Text of the leading system turn, if present.
    pub fn system_prompt(&self) -> Option<&str> {
        self.turns
            .first()
            .filter(|t| t.role == Role::System)
            .map(|t| t.text.as_str())
    }

    pub fn non_system(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter().filter(|t| t.role != Role::System)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Quota class being limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaKind {
    Text,
    Image,
}

impl QuotaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaKind::Text => "text",
            QuotaKind::Image => "image",
        }
    }
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display metadata for a chat. Best effort only; never used for decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInfo {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub title: Option<String>,
}

impl ChatInfo {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.first_name.is_none() && self.title.is_none()
    }

    /// "@username", the title, or the first name, whichever is known first.
    pub fn label(&self) -> Option<String> {
        if let Some(ref u) = self.username {
            return Some(format!("@{u}"));
        }
        self.title.clone().or_else(|| self.first_name.clone())
    }

    /// Overwrite the fields `other` knows about; keep the rest.
    pub fn merge(&mut self, other: &ChatInfo) {
        if other.username.is_some() {
            self.username = other.username.clone();
        }
        if other.first_name.is_some() {
            self.first_name = other.first_name.clone();
        }
        if other.title.is_some() {
            self.title = other.title.clone();
        }
    }
}

/// Aggregate numbers for the admin statistics screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageStats {
    pub total_chats: usize,
    pub unlimited_chats: usize,
    pub total_messages: usize,
    pub text_requests_today: u32,
    pub image_requests_today: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_puts_system_first() {
        let h = ConversationHistory::new(
            7,
            "be nice",
            vec![ConversationTurn {
                role: Role::User,
                text: "hi".into(),
                sequence: 1,
            }],
        );
        assert_eq!(h.system_prompt(), Some("be nice"));
        assert_eq!(h.turns[0].sequence, 0);
        assert_eq!(h.non_system().count(), 1);
    }

    #[test]
    fn test_role_roundtrip_names() {
        for role in [Role::System, Role::User, Role::Assistant] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("tool"), None);
    }

    #[test]
    fn test_chat_info_label_prefers_username() {
        let info = ChatInfo {
            username: Some("alice".into()),
            first_name: Some("Alice".into()),
            title: None,
        };
        assert_eq!(info.label().as_deref(), Some("@alice"));

        let group = ChatInfo {
            title: Some("Rustaceans".into()),
            ..Default::default()
        };
        assert_eq!(group.label().as_deref(), Some("Rustaceans"));
        assert_eq!(ChatInfo::default().label(), None);
    }
}
