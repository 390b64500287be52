//! JSON state file plus a newline-delimited whitelist file.
//!
//! The whole state is rewritten after every mutation. Mutations are applied to
//! a copy and only swapped in once the copy is on disk, so a failed write
//! leaves both memory and disk at the previous state.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{StateBackend, excess_turns};
use crate::assistant::error::StorageError;
use crate::assistant::types::{
    ChatId, ChatInfo, ConversationHistory, ConversationTurn, QuotaKind, Role, UsageStats,
};

/// On-disk layout of the state file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub prompts: HashMap<ChatId, String>,
    /// chat -> [date, count]
    #[serde(default)]
    pub daily_usage: HashMap<ChatId, (NaiveDate, u32)>,
    #[serde(default)]
    pub image_usage: HashMap<ChatId, (NaiveDate, u32)>,
    /// Stored user/assistant turns. The system turn is not stored here.
    #[serde(default)]
    pub histories: HashMap<ChatId, Vec<ConversationTurn>>,
    /// Last sequence number handed out per chat.
    #[serde(default)]
    pub sequences: HashMap<ChatId, u64>,
    #[serde(default)]
    pub chats: HashMap<ChatId, ChatInfo>,
}

impl PersistedState {
    fn counters(&self, kind: QuotaKind) -> &HashMap<ChatId, (NaiveDate, u32)> {
        match kind {
            QuotaKind::Text => &self.daily_usage,
            QuotaKind::Image => &self.image_usage,
        }
    }

    fn counters_mut(&mut self, kind: QuotaKind) -> &mut HashMap<ChatId, (NaiveDate, u32)> {
        match kind {
            QuotaKind::Text => &mut self.daily_usage,
            QuotaKind::Image => &mut self.image_usage,
        }
    }

    fn count_for(&self, chat: ChatId, kind: QuotaKind, day: NaiveDate) -> u32 {
        match self.counters(kind).get(&chat) {
            Some((date, count)) if *date == day => *count,
            _ => 0,
        }
    }

    /// Older files kept the system turn inside the history and had no
    /// sequence numbers. Strip the former and number the turns.
    fn normalize(&mut self) {
        for (chat, turns) in self.histories.iter_mut() {
            turns.retain(|t| t.role != Role::System);
            let mut last = self.sequences.get(chat).copied().unwrap_or(0);
            for turn in turns.iter_mut() {
                if turn.sequence <= last {
                    last += 1;
                    turn.sequence = last;
                } else {
                    last = turn.sequence;
                }
            }
            self.sequences.insert(*chat, last);
        }
        self.histories.retain(|_, turns| !turns.is_empty());
    }
}

struct Inner {
    state: PersistedState,
    whitelist: BTreeSet<ChatId>,
}

/// File-backed [`StateBackend`].
pub struct JsonFileBackend {
    state_path: PathBuf,
    whitelist_path: PathBuf,
    default_prompt: String,
    inner: Mutex<Inner>,
}

impl JsonFileBackend {
    /// Load both files, starting empty for whichever does not exist yet.
    pub fn open(
        state_path: impl Into<PathBuf>,
        whitelist_path: impl Into<PathBuf>,
        default_prompt: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let state_path = state_path.into();
        let whitelist_path = whitelist_path.into();

        let state = load_state(&state_path)?;
        let whitelist = load_whitelist(&whitelist_path)?;

        info!(
            "Loaded state from {:?} ({} histories, {} unlimited chats)",
            state_path,
            state.histories.len(),
            whitelist.len()
        );

        Ok(Self {
            state_path,
            whitelist_path,
            default_prompt: default_prompt.into(),
            inner: Mutex::new(Inner { state, whitelist }),
        })
    }

    /// Copy of the persisted state, for migrations.
    pub fn snapshot(&self) -> (PersistedState, Vec<ChatId>) {
        let inner = self.lock();
        (inner.state.clone(), inner.whitelist.iter().copied().collect())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `f` to a copy of the state, persist it, then publish it.
    fn mutate_state<R>(&self, f: impl FnOnce(&mut PersistedState) -> R) -> Result<R, StorageError> {
        let mut inner = self.lock();
        let mut next = inner.state.clone();
        let result = f(&mut next);
        save_state(&self.state_path, &next)?;
        inner.state = next;
        Ok(result)
    }

    fn build_history(&self, state: &PersistedState, chat: ChatId) -> ConversationHistory {
        let prompt = state
            .prompts
            .get(&chat)
            .map(String::as_str)
            .unwrap_or(&self.default_prompt);
        let turns = state.histories.get(&chat).cloned().unwrap_or_default();
        ConversationHistory::new(chat, prompt, turns)
    }
}

impl StateBackend for JsonFileBackend {
    fn history(&self, chat: ChatId) -> Result<ConversationHistory, StorageError> {
        let inner = self.lock();
        Ok(self.build_history(&inner.state, chat))
    }

    fn append_turn(
        &self,
        chat: ChatId,
        role: Role,
        text: &str,
    ) -> Result<ConversationTurn, StorageError> {
        if role == Role::System {
            return Err(StorageError::InvalidTurn(role));
        }
        self.mutate_state(|state| {
            let seq = state.sequences.entry(chat).or_insert(0);
            *seq += 1;
            let turn = ConversationTurn {
                role,
                text: text.to_string(),
                sequence: *seq,
            };
            state.histories.entry(chat).or_default().push(turn.clone());
            turn
        })
    }

    fn truncate(&self, chat: ChatId, max_turns: usize) -> Result<usize, StorageError> {
        let stored = self.lock().state.histories.get(&chat).map_or(0, Vec::len);
        if excess_turns(stored, max_turns) == 0 {
            return Ok(0);
        }
        self.mutate_state(|state| {
            let Some(turns) = state.histories.get_mut(&chat) else {
                return 0;
            };
            let extra = excess_turns(turns.len(), max_turns);
            turns.drain(..extra);
            extra
        })
    }

    fn reset_history(&self, chat: ChatId) -> Result<(), StorageError> {
        self.mutate_state(|state| {
            state.histories.remove(&chat);
        })
    }

    fn set_system_prompt(&self, chat: ChatId, text: &str) -> Result<(), StorageError> {
        self.mutate_state(|state| {
            state.prompts.insert(chat, text.to_string());
            state.histories.remove(&chat);
        })
    }

    fn clear_system_prompt(&self, chat: ChatId) -> Result<(), StorageError> {
        self.mutate_state(|state| {
            state.prompts.remove(&chat);
            state.histories.remove(&chat);
        })
    }

    fn system_prompt(&self, chat: ChatId) -> Result<Option<String>, StorageError> {
        Ok(self.lock().state.prompts.get(&chat).cloned())
    }

    fn quota_count(
        &self,
        chat: ChatId,
        kind: QuotaKind,
        day: NaiveDate,
    ) -> Result<u32, StorageError> {
        Ok(self.lock().state.count_for(chat, kind, day))
    }

    fn increment_quota_if_under(
        &self,
        chat: ChatId,
        kind: QuotaKind,
        day: NaiveDate,
        limit: u32,
    ) -> Result<bool, StorageError> {
        // Check and write under one lock hold; a second caller sees the new count.
        let mut inner = self.lock();
        let count = inner.state.count_for(chat, kind, day);
        if count >= limit {
            debug!("Quota {} for chat {} at {}/{}", kind, chat, count, limit);
            return Ok(false);
        }
        let mut next = inner.state.clone();
        next.counters_mut(kind).insert(chat, (day, count + 1));
        save_state(&self.state_path, &next)?;
        inner.state = next;
        Ok(true)
    }

    fn is_whitelisted(&self, chat: ChatId) -> Result<bool, StorageError> {
        Ok(self.lock().whitelist.contains(&chat))
    }

    fn set_whitelisted(&self, chat: ChatId, unlimited: bool) -> Result<bool, StorageError> {
        let mut inner = self.lock();
        if inner.whitelist.contains(&chat) == unlimited {
            return Ok(false);
        }
        let mut next = inner.whitelist.clone();
        if unlimited {
            next.insert(chat);
        } else {
            next.remove(&chat);
        }
        save_whitelist(&self.whitelist_path, &next)?;
        inner.whitelist = next;
        Ok(true)
    }

    fn whitelisted(&self) -> Result<Vec<ChatId>, StorageError> {
        Ok(self.lock().whitelist.iter().copied().collect())
    }

    fn record_chat_info(&self, chat: ChatId, info: &ChatInfo) -> Result<(), StorageError> {
        if info.is_empty() {
            return Ok(());
        }
        {
            let inner = self.lock();
            let mut merged = inner.state.chats.get(&chat).cloned().unwrap_or_default();
            merged.merge(info);
            if inner.state.chats.get(&chat) == Some(&merged) {
                return Ok(());
            }
        }
        self.mutate_state(|state| {
            state.chats.entry(chat).or_default().merge(info);
        })
    }

    fn chat_info(&self, chat: ChatId) -> Result<Option<ChatInfo>, StorageError> {
        Ok(self.lock().state.chats.get(&chat).cloned())
    }

    fn stats(&self, day: NaiveDate) -> Result<UsageStats, StorageError> {
        let inner = self.lock();
        let state = &inner.state;

        let mut chats: HashSet<ChatId> = HashSet::new();
        chats.extend(state.prompts.keys());
        chats.extend(state.daily_usage.keys());
        chats.extend(state.image_usage.keys());
        chats.extend(state.histories.keys());
        chats.extend(state.chats.keys());
        chats.extend(inner.whitelist.iter());

        let sum_today = |map: &HashMap<ChatId, (NaiveDate, u32)>| -> u32 {
            map.values().filter(|(d, _)| *d == day).map(|(_, c)| *c).sum()
        };

        Ok(UsageStats {
            total_chats: chats.len(),
            unlimited_chats: inner.whitelist.len(),
            total_messages: state.histories.values().map(Vec::len).sum(),
            text_requests_today: sum_today(&state.daily_usage),
            image_requests_today: sum_today(&state.image_usage),
        })
    }
}

fn load_state(path: &Path) -> Result<PersistedState, StorageError> {
    if !path.exists() {
        info!("No state file at {:?}, starting fresh", path);
        return Ok(PersistedState::default());
    }
    let json = std::fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
    let mut state: PersistedState = serde_json::from_str(&json)?;
    state.normalize();
    Ok(state)
}

fn save_state(path: &Path, state: &PersistedState) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(state)?;
    write_atomically(path, json.as_bytes())
}

/// Parse a newline-delimited list of chat IDs, skipping junk lines.
pub fn parse_whitelist(text: &str) -> BTreeSet<ChatId> {
    let mut ids = BTreeSet::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<ChatId>() {
            Ok(id) => {
                ids.insert(id);
            }
            Err(_) => warn!("Skipping invalid line in whitelist: {line}"),
        }
    }
    ids
}

pub fn load_whitelist(path: &Path) -> Result<BTreeSet<ChatId>, StorageError> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let text = std::fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
    Ok(parse_whitelist(&text))
}

fn save_whitelist(path: &Path, ids: &BTreeSet<ChatId>) -> Result<(), StorageError> {
    let mut text = String::new();
    for id in ids {
        text.push_str(&id.to_string());
        text.push('\n');
    }
    write_atomically(path, text.as_bytes())
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes).map_err(|e| StorageError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| StorageError::io(path, e))
}
