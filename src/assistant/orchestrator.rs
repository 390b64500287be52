//! Per-command workflow: authorize, charge quota, update history, call the
//! provider, persist, reply.
//!
//! Quota is taken before the provider is called and is not refunded when the
//! provider fails. The user turn also stays stored in that case.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::backend::StateBackend;
use super::conversation::ConversationStore;
use super::error::{RequestError, StorageError};
use super::locks::ChatLocks;
use super::provider::CompletionProvider;
use super::quota::QuotaTracker;
use super::transport::{ChatAction, ChatTransport, TypingIndicator};
use super::types::{ChatId, ChatInfo, QuotaKind};
use super::whitelist::WhitelistRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Ask(String),
    Image(String),
    SetPrompt(String),
    Reset,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Ask(_) => "ask",
            Command::Image(_) => "image",
            Command::SetPrompt(_) => "setprompt",
            Command::Reset => "reset",
        }
    }
}

/// One command from one chat.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub chat: ChatId,
    /// Sender, when Telegram reports one (channel posts have none).
    pub user: Option<i64>,
    /// The triggering message; replies are threaded to it.
    pub message_id: Option<i64>,
    /// Text of the message the command replied to. `/ask` without an
    /// argument asks about it.
    pub quoted_text: Option<String>,
    pub chat_info: ChatInfo,
    pub command: Command,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub temperature: f32,
    pub max_question_len: usize,
    /// Empty means every chat may use the bot.
    pub allowed_chats: HashSet<ChatId>,
    pub admin_ids: HashSet<i64>,
    /// Only admins and unlimited chats may change the prompt.
    pub restrict_setprompt: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_question_len: 4000,
            allowed_chats: HashSet::new(),
            admin_ids: HashSet::new(),
            restrict_setprompt: true,
        }
    }
}

pub struct RequestOrchestrator {
    backend: Arc<dyn StateBackend>,
    quota: Arc<QuotaTracker>,
    whitelist: Arc<WhitelistRegistry>,
    conversations: ConversationStore,
    provider: Arc<dyn CompletionProvider>,
    transport: Arc<dyn ChatTransport>,
    locks: ChatLocks,
    settings: OrchestratorSettings,
}

impl RequestOrchestrator {
    pub fn new(
        backend: Arc<dyn StateBackend>,
        quota: Arc<QuotaTracker>,
        whitelist: Arc<WhitelistRegistry>,
        conversations: ConversationStore,
        provider: Arc<dyn CompletionProvider>,
        transport: Arc<dyn ChatTransport>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            backend,
            quota,
            whitelist,
            conversations,
            provider,
            transport,
            locks: ChatLocks::new(),
            settings,
        }
    }

    /// Run one command to completion. Never fails: every error becomes a reply.
    pub async fn handle(&self, request: InboundRequest) {
        let _guard = self.locks.lock(request.chat).await;
        let chat = request.chat;
        info!(
            "📨 /{} from chat {} (user {:?})",
            request.command.name(),
            chat,
            request.user
        );

        if !request.chat_info.is_empty() {
            if let Err(e) = self.backend.record_chat_info(chat, &request.chat_info) {
                warn!("Failed to record chat info for {}: {}", chat, e);
            }
        }

        let result = match &request.command {
            Command::Start => self.start(&request).await,
            Command::Ask(text) => {
                let question = match (text.trim(), request.quoted_text.as_deref()) {
                    ("", Some(quoted)) => quoted.trim(),
                    (own, _) => own,
                };
                self.ask(&request, question).await
            }
            Command::Image(text) => self.image(&request, text.trim()).await,
            Command::SetPrompt(text) => self.set_prompt(&request, text.trim()).await,
            Command::Reset => self.reset(&request).await,
        };

        if let Err(e) = result {
            match &e {
                RequestError::Storage(inner) => {
                    error!("Storage failure in chat {}: {}", chat, inner)
                }
                RequestError::Provider(inner) => {
                    warn!("Provider failure in chat {}: {}", chat, inner)
                }
                other => debug!("Request from chat {} rejected: {}", chat, other),
            }
            self.reply(chat, &e.user_message(), request.message_id).await;
        }
    }

    async fn reply(&self, chat: ChatId, text: &str, reply_to: Option<i64>) {
        if let Err(e) = self.transport.send_text(chat, text, reply_to).await {
            warn!("Reply to chat {} not delivered: {}", chat, e);
        }
    }

    fn is_admin(&self, request: &InboundRequest) -> bool {
        request
            .user
            .is_some_and(|u| self.settings.admin_ids.contains(&u))
    }

    fn authorize(&self, request: &InboundRequest) -> Result<(), RequestError> {
        let allowed = &self.settings.allowed_chats;
        if allowed.is_empty() || allowed.contains(&request.chat) || self.is_admin(request) {
            Ok(())
        } else {
            Err(RequestError::AuthorizationDenied)
        }
    }

    fn charge(&self, chat: ChatId, kind: QuotaKind) -> Result<(), RequestError> {
        if self.quota.allow_and_consume(chat, kind)? {
            Ok(())
        } else {
            Err(RequestError::QuotaExceeded {
                kind,
                limit: self.quota.limits().for_kind(kind),
            })
        }
    }

    fn check_length(&self, text: &str) -> Result<(), RequestError> {
        let max = self.settings.max_question_len;
        if text.chars().count() > max {
            return Err(RequestError::Validation(format!(
                "The request is too long. The maximum is {max} characters."
            )));
        }
        Ok(())
    }

    fn remaining_today(&self, chat: ChatId) -> Result<Option<(u32, u32)>, StorageError> {
        let text = self.quota.remaining(chat, QuotaKind::Text)?;
        let image = self.quota.remaining(chat, QuotaKind::Image)?;
        Ok(text.zip(image))
    }

    async fn start(&self, request: &InboundRequest) -> Result<(), RequestError> {
        let limits = self.quota.limits();
        let left = match self.remaining_today(request.chat) {
            Ok(Some((text, image))) => {
                format!("Left today: {text} questions and {image} images.")
            }
            Ok(None) => "This chat has no daily limits.".to_string(),
            Err(e) => {
                warn!("Remaining quota for chat {} unavailable: {}", request.chat, e);
                String::new()
            }
        };
        let help = format!(
            "👋 <b>Hi! I'm an assistant powered by YandexGPT.</b>\n\n\
             <b>Commands:</b>\n\
             /ask &lt;question&gt; - ask a question (or reply to a message with /ask)\n\
             /image &lt;description&gt; - generate an image\n\
             /setprompt &lt;text&gt; - set a custom system prompt\n\
             /reset - restore the default prompt and clear the history\n\n\
             <b>Limits:</b> {} questions and {} images per day. {left}",
            limits.text, limits.image
        );
        if let Err(e) = self.transport.send_html(request.chat, &help).await {
            warn!("Help for chat {} not delivered: {}", request.chat, e);
        }
        Ok(())
    }

    async fn ask(&self, request: &InboundRequest, question: &str) -> Result<(), RequestError> {
        let chat = request.chat;
        self.authorize(request)?;
        if question.is_empty() {
            self.reply(chat, "Usage: /ask <question>", request.message_id).await;
            return Ok(());
        }
        self.charge(chat, QuotaKind::Text)?;
        self.check_length(question)?;

        let history = self.conversations.record_user_turn(chat, question)?;
        debug!("Asking provider with {} turns for chat {}", history.len(), chat);

        let answer = {
            let _typing =
                TypingIndicator::start(self.transport.clone(), chat, ChatAction::Typing);
            self.provider
                .complete(&history, self.settings.temperature)
                .await?
        };

        // Deliver the answer even when it cannot be stored.
        if let Err(e) = self.conversations.record_assistant_turn(chat, &answer) {
            error!("Answer for chat {} not stored: {}", chat, e);
        }
        self.reply(chat, &answer, request.message_id).await;
        Ok(())
    }

    async fn image(&self, request: &InboundRequest, description: &str) -> Result<(), RequestError> {
        let chat = request.chat;
        self.authorize(request)?;
        if description.is_empty() {
            self.reply(chat, "Usage: /image <description>", request.message_id).await;
            return Ok(());
        }
        self.charge(chat, QuotaKind::Image)?;
        self.check_length(description)?;

        let image = {
            let _uploading =
                TypingIndicator::start(self.transport.clone(), chat, ChatAction::UploadPhoto);
            self.provider.generate_image(description).await?
        };

        if let Err(e) = self.transport.send_photo(chat, image, request.message_id).await {
            warn!("Image for chat {} not delivered: {}", chat, e);
        }
        Ok(())
    }

    async fn set_prompt(&self, request: &InboundRequest, prompt: &str) -> Result<(), RequestError> {
        let chat = request.chat;
        self.authorize(request)?;
        if self.settings.restrict_setprompt
            && !self.is_admin(request)
            && !self.whitelist.contains(chat)?
        {
            info!("🚫 Prompt change refused for chat {}", chat);
            return Err(RequestError::AuthorizationDenied);
        }
        if prompt.is_empty() {
            self.reply(chat, "Usage: /setprompt <text>", request.message_id).await;
            return Ok(());
        }
        self.check_length(prompt)?;

        self.conversations.set_prompt(chat, prompt)?;
        info!("📝 System prompt updated for chat {}", chat);
        self.reply(
            chat,
            "✅ System prompt updated. The conversation history has been cleared.",
            request.message_id,
        )
        .await;
        Ok(())
    }

    async fn reset(&self, request: &InboundRequest) -> Result<(), RequestError> {
        let chat = request.chat;
        self.authorize(request)?;
        self.conversations.reset(chat)?;
        info!("🔄 Context reset for chat {}", chat);
        self.reply(
            chat,
            "🔄 The default prompt is restored and the history is cleared.",
            request.message_id,
        )
        .await;
        Ok(())
    }
}
