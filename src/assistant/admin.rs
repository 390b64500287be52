//! Interactive admin menu: whitelist management and usage statistics.
//!
//! The panel only produces [`AdminView`]s; the Telegram layer renders them as
//! inline keyboards. Multi-step flows are tracked per chat in [`AdminState`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::backend::StateBackend;
use super::error::RequestError;
use super::quota::QuotaTracker;
use super::types::ChatId;
use super::whitelist::WhitelistRegistry;

const MAIN_TITLE: &str = "🛠 Admin panel\n\nChoose an action:";

/// Where a chat is in a multi-step admin flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdminState {
    #[default]
    Idle,
    AwaitingAddId,
    AwaitingRemoveSelection,
}

/// A button press, as carried in callback data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    ListUsers,
    Stats,
    AddUser,
    RemoveUser,
    Back,
    SelectRemove(ChatId),
    ConfirmAdd(ChatId),
    ConfirmRemove(ChatId),
}

impl AdminAction {
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "list_users" => return Some(Self::ListUsers),
            "stats" => return Some(Self::Stats),
            "add_user" => return Some(Self::AddUser),
            "remove_user" => return Some(Self::RemoveUser),
            "back" => return Some(Self::Back),
            _ => {}
        }
        let (tag, id) = data.split_once(':')?;
        let id: ChatId = id.trim().parse().ok()?;
        match tag {
            "select_remove" => Some(Self::SelectRemove(id)),
            "confirm_add" => Some(Self::ConfirmAdd(id)),
            "confirm_remove" => Some(Self::ConfirmRemove(id)),
            _ => None,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::ListUsers => "list_users".to_string(),
            Self::Stats => "stats".to_string(),
            Self::AddUser => "add_user".to_string(),
            Self::RemoveUser => "remove_user".to_string(),
            Self::Back => "back".to_string(),
            Self::SelectRemove(id) => format!("select_remove:{id}"),
            Self::ConfirmAdd(id) => format!("confirm_add:{id}"),
            Self::ConfirmRemove(id) => format!("confirm_remove:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuButton {
    pub label: String,
    pub action: AdminAction,
}

impl MenuButton {
    fn new(label: impl Into<String>, action: AdminAction) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

/// Text plus rows of buttons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminView {
    pub text: String,
    pub buttons: Vec<Vec<MenuButton>>,
}

impl AdminView {
    fn with_back(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: vec![vec![MenuButton::new("⬅️ Back", AdminAction::Back)]],
        }
    }

    fn confirm(text: impl Into<String>, yes: AdminAction) -> Self {
        Self {
            text: text.into(),
            buttons: vec![
                vec![MenuButton::new("✅ Yes", yes)],
                vec![MenuButton::new("❌ No", AdminAction::Back)],
            ],
        }
    }

    pub fn main_menu() -> Self {
        Self {
            text: MAIN_TITLE.to_string(),
            buttons: vec![
                vec![
                    MenuButton::new("👥 Unlimited chats", AdminAction::ListUsers),
                    MenuButton::new("📊 Statistics", AdminAction::Stats),
                ],
                vec![
                    MenuButton::new("➕ Add chat", AdminAction::AddUser),
                    MenuButton::new("➖ Remove chat", AdminAction::RemoveUser),
                ],
            ],
        }
    }
}

/// Free-form input while a flow is waiting for it.
#[derive(Debug, Clone, Copy)]
pub enum AdminInput<'a> {
    Text(&'a str),
    /// A shared contact; `None` when the contact has no Telegram account.
    Contact(Option<i64>),
}

pub struct AdminPanel {
    admins: HashSet<i64>,
    whitelist: Arc<WhitelistRegistry>,
    quota: Arc<QuotaTracker>,
    backend: Arc<dyn StateBackend>,
    states: Mutex<HashMap<ChatId, AdminState>>,
}

impl AdminPanel {
    pub fn new(
        admins: impl IntoIterator<Item = i64>,
        whitelist: Arc<WhitelistRegistry>,
        quota: Arc<QuotaTracker>,
        backend: Arc<dyn StateBackend>,
    ) -> Self {
        Self {
            admins: admins.into_iter().collect(),
            whitelist,
            quota,
            backend,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_admin(&self, user: i64) -> bool {
        self.admins.contains(&user)
    }

    pub fn state(&self, chat: ChatId) -> AdminState {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&chat)
            .copied()
            .unwrap_or_default()
    }

    fn set_state(&self, chat: ChatId, state: AdminState) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        if state == AdminState::Idle {
            states.remove(&chat);
        } else {
            states.insert(chat, state);
        }
    }

    /// `/admin`. Any pending flow is cancelled.
    pub fn open(&self, user: i64, chat: ChatId) -> Result<AdminView, RequestError> {
        if !self.is_admin(user) {
            info!("🚫 User {} tried to open the admin panel", user);
            return Err(RequestError::AuthorizationDenied);
        }
        self.set_state(chat, AdminState::Idle);
        Ok(AdminView::main_menu())
    }

    pub fn on_action(
        &self,
        user: i64,
        chat: ChatId,
        action: AdminAction,
    ) -> Result<AdminView, RequestError> {
        if !self.is_admin(user) {
            return Err(RequestError::AuthorizationDenied);
        }
        debug!("Admin action {:?} in chat {}", action, chat);

        match action {
            AdminAction::Back => {
                self.set_state(chat, AdminState::Idle);
                Ok(AdminView::main_menu())
            }
            AdminAction::ListUsers => self.list_view(),
            AdminAction::Stats => self.stats_view(),
            AdminAction::AddUser => {
                self.set_state(chat, AdminState::AwaitingAddId);
                Ok(AdminView::with_back(
                    "➕ Add an unlimited chat\n\n\
                     Send the chat ID as a number, or share the user's contact.",
                ))
            }
            AdminAction::RemoveUser => self.removal_view(chat),
            AdminAction::SelectRemove(id) => Ok(AdminView::confirm(
                format!("Remove {} from the unlimited list?", self.label(id)),
                AdminAction::ConfirmRemove(id),
            )),
            AdminAction::ConfirmAdd(id) => {
                self.set_state(chat, AdminState::Idle);
                let text = if self.whitelist.add(id)? {
                    format!("✅ {} now has unlimited access.", self.label(id))
                } else {
                    format!("ℹ️ {} already has unlimited access.", self.label(id))
                };
                Ok(AdminView::with_back(text))
            }
            AdminAction::ConfirmRemove(id) => {
                self.set_state(chat, AdminState::Idle);
                let text = if self.whitelist.remove(id)? {
                    format!("✅ {} no longer has unlimited access.", self.label(id))
                } else {
                    format!("ℹ️ {} was not on the unlimited list.", self.label(id))
                };
                Ok(AdminView::with_back(text))
            }
        }
    }

    /// Feed a message to a pending flow. `None` means the message is not for
    /// the panel and should be handled normally.
    pub fn on_input(
        &self,
        user: i64,
        chat: ChatId,
        input: AdminInput<'_>,
    ) -> Result<Option<AdminView>, RequestError> {
        if !self.is_admin(user) {
            return Ok(None);
        }

        match (self.state(chat), input) {
            (AdminState::Idle, _) => Ok(None),
            (AdminState::AwaitingAddId, AdminInput::Contact(Some(id))) => {
                Ok(Some(self.confirm_add(id)))
            }
            (AdminState::AwaitingAddId, AdminInput::Contact(None)) => Ok(Some(AdminView::with_back(
                "⚠️ This contact has no Telegram account. Send the numeric ID instead.",
            ))),
            (AdminState::AwaitingAddId, AdminInput::Text(text)) => {
                match text.trim().parse::<ChatId>() {
                    Ok(id) => Ok(Some(self.confirm_add(id))),
                    Err(_) => Ok(Some(AdminView::with_back("⚠️ That is not a valid chat ID."))),
                }
            }
            (AdminState::AwaitingRemoveSelection, AdminInput::Text(text)) => {
                let listed = self.whitelist.list()?;
                let picked = text
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| listed.get(i).copied());
                match picked {
                    Some(id) => {
                        Ok(Some(self.on_action(user, chat, AdminAction::SelectRemove(id))?))
                    }
                    None => Ok(Some(AdminView::with_back("⚠️ Pick a number from the list."))),
                }
            }
            (AdminState::AwaitingRemoveSelection, AdminInput::Contact(_)) => Ok(None),
        }
    }

    fn confirm_add(&self, id: ChatId) -> AdminView {
        AdminView::confirm(
            format!("Give {} unlimited access?", self.label(id)),
            AdminAction::ConfirmAdd(id),
        )
    }

    fn label(&self, chat: ChatId) -> String {
        match self.backend.chat_info(chat) {
            Ok(Some(info)) => match info.label() {
                Some(label) => format!("{label} ({chat})"),
                None => chat.to_string(),
            },
            _ => chat.to_string(),
        }
    }

    fn list_view(&self) -> Result<AdminView, RequestError> {
        let ids = self.whitelist.list()?;
        if ids.is_empty() {
            return Ok(AdminView::with_back("👥 Unlimited chats\n\nThe list is empty."));
        }
        let mut text = String::from("👥 Unlimited chats\n");
        for (i, id) in ids.iter().enumerate() {
            text.push_str(&format!("\n{}. {}", i + 1, self.label(*id)));
        }
        Ok(AdminView::with_back(text))
    }

    fn removal_view(&self, chat: ChatId) -> Result<AdminView, RequestError> {
        let ids = self.whitelist.list()?;
        if ids.is_empty() {
            self.set_state(chat, AdminState::Idle);
            return Ok(AdminView::with_back("👥 Unlimited chats\n\nThe list is empty."));
        }
        self.set_state(chat, AdminState::AwaitingRemoveSelection);

        let mut text = String::from("➖ Pick a chat to remove, or send its number:\n");
        let mut buttons = Vec::with_capacity(ids.len() + 1);
        for (i, id) in ids.iter().enumerate() {
            let label = self.label(*id);
            text.push_str(&format!("\n{}. {}", i + 1, label));
            buttons.push(vec![MenuButton::new(label, AdminAction::SelectRemove(*id))]);
        }
        buttons.push(vec![MenuButton::new("⬅️ Back", AdminAction::Back)]);
        Ok(AdminView { text, buttons })
    }

    fn stats_view(&self) -> Result<AdminView, RequestError> {
        let day = self.quota.today();
        let stats = self.backend.stats(day)?;
        let limits = self.quota.limits();
        Ok(AdminView::with_back(format!(
            "📊 Statistics for {day}\n\n\
             Chats: {}\n\
             Unlimited chats: {}\n\
             Stored messages: {}\n\
             Text requests today: {}\n\
             Image requests today: {}\n\n\
             Limits: {} text / {} image requests per day",
            stats.total_chats,
            stats.unlimited_chats,
            stats.total_messages,
            stats.text_requests_today,
            stats.image_requests_today,
            limits.text,
            limits.image,
        )))
    }
}
