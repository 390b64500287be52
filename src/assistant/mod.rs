//! Assistant module - quotas, conversation state and the command workflow
//! between Telegram and YandexGPT.

pub mod admin;
pub mod backend;
pub mod codec;
pub mod conversation;
pub mod error;
pub mod locks;
pub mod orchestrator;
pub mod provider;
pub mod quota;
pub mod telegram;
pub mod transport;
pub mod types;
pub mod whitelist;
pub mod yandex;

#[cfg(test)]
mod tests;

pub use admin::{AdminAction, AdminInput, AdminPanel, AdminState, AdminView};
pub use backend::{JsonFileBackend, SqliteBackend, StateBackend};
pub use conversation::ConversationStore;
pub use error::{ProviderError, RequestError, StorageError, TransportError};
pub use orchestrator::{Command, InboundRequest, OrchestratorSettings, RequestOrchestrator};
pub use provider::CompletionProvider;
pub use quota::{QuotaLimits, QuotaTracker};
pub use telegram::TelegramClient;
pub use transport::ChatTransport;
pub use types::{ChatId, ChatInfo, QuotaKind, Role};
pub use whitelist::WhitelistRegistry;
pub use yandex::YandexClient;
