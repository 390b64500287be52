//! Outbound side of the chat platform.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::admin::AdminView;
use super::error::TransportError;
use super::types::ChatId;

const ACTION_REFRESH: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
    UploadPhoto,
}

/// Message ids are returned so menus can be edited in place.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Plain text, no markup parsing.
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<i64, TransportError>;

    async fn send_html(&self, chat: ChatId, html: &str) -> Result<i64, TransportError>;

    async fn send_photo(
        &self,
        chat: ChatId,
        image: Vec<u8>,
        reply_to: Option<i64>,
    ) -> Result<i64, TransportError>;

    async fn send_action(&self, chat: ChatId, action: ChatAction) -> Result<(), TransportError>;

    async fn send_menu(&self, chat: ChatId, view: &AdminView) -> Result<i64, TransportError>;

    async fn edit_menu(
        &self,
        chat: ChatId,
        message_id: i64,
        view: &AdminView,
    ) -> Result<(), TransportError>;
}

/// Keeps a chat action visible until dropped. Send failures are ignored.
pub struct TypingIndicator {
    handle: JoinHandle<()>,
}

impl TypingIndicator {
    pub fn start(transport: Arc<dyn ChatTransport>, chat: ChatId, action: ChatAction) -> Self {
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(ACTION_REFRESH);
            loop {
                tick.tick().await;
                let _ = transport.send_action(chat, action).await;
            }
        });
        Self { handle }
    }
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
