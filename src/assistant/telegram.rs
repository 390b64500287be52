//! Telegram transport using teloxide.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    ChatAction as TgChatAction, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId,
    ParseMode, ReplyParameters,
};
use tracing::{info, warn};

use super::admin::AdminView;
use super::error::TransportError;
use super::transport::{ChatAction, ChatTransport};

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn keyboard(view: &AdminView) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(view.buttons.iter().map(|row| {
        row.iter()
            .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.action.encode()))
            .collect::<Vec<_>>()
    }))
}

fn failed(what: &str, e: impl std::fmt::Display) -> TransportError {
    let msg = format!("Failed to {what}: {e}");
    warn!("{}", msg);
    TransportError(msg)
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_text(
        &self,
        chat: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<i64, TransportError> {
        let mut request = self.bot.send_message(ChatId(chat), text);
        if let Some(msg_id) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id as i32)));
        }
        request
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| failed("send", e))
    }

    async fn send_html(&self, chat: i64, html: &str) -> Result<i64, TransportError> {
        self.bot
            .send_message(ChatId(chat), html)
            .parse_mode(ParseMode::Html)
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| failed("send", e))
    }

    async fn send_photo(
        &self,
        chat: i64,
        image: Vec<u8>,
        reply_to: Option<i64>,
    ) -> Result<i64, TransportError> {
        info!("📷 Sending image to chat {} ({} bytes)", chat, image.len());

        let input_file = InputFile::memory(image).file_name("image.jpeg");
        let mut request = self.bot.send_photo(ChatId(chat), input_file);
        if let Some(msg_id) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id as i32)));
        }
        request
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| failed("send image", e))
    }

    async fn send_action(&self, chat: i64, action: ChatAction) -> Result<(), TransportError> {
        let action = match action {
            ChatAction::Typing => TgChatAction::Typing,
            ChatAction::UploadPhoto => TgChatAction::UploadPhoto,
        };
        self.bot
            .send_chat_action(ChatId(chat), action)
            .await
            .map(|_| ())
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn send_menu(&self, chat: i64, view: &AdminView) -> Result<i64, TransportError> {
        self.bot
            .send_message(ChatId(chat), &view.text)
            .reply_markup(keyboard(view))
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| failed("send menu", e))
    }

    async fn edit_menu(
        &self,
        chat: i64,
        message_id: i64,
        view: &AdminView,
    ) -> Result<(), TransportError> {
        self.bot
            .edit_message_text(ChatId(chat), MessageId(message_id as i32), &view.text)
            .reply_markup(keyboard(view))
            .await
            .map(|_| ())
            .map_err(|e| failed("edit menu", e))
    }
}
