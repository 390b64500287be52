//! SQLite-backed state. Prompt and message text go through a [`ContentCodec`].

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use tracing::{debug, info};

use super::file::PersistedState;
use super::{StateBackend, excess_turns};
use crate::assistant::codec::{ContentCodec, PlainCodec};
use crate::assistant::error::StorageError;
use crate::assistant::types::{
    ChatId, ChatInfo, ConversationHistory, ConversationTurn, QuotaKind, Role, UsageStats,
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS chats (
        chat_id INTEGER PRIMARY KEY,
        is_unlimited INTEGER NOT NULL DEFAULT 0,
        username TEXT,
        first_name TEXT,
        title TEXT,
        next_sequence INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS system_prompts (
        chat_id INTEGER PRIMARY KEY,
        prompt_text TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        chat_id INTEGER NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        sequence INTEGER NOT NULL,
        timestamp TEXT NOT NULL,
        UNIQUE (chat_id, sequence)
    );

    CREATE TABLE IF NOT EXISTS usage_counters (
        chat_id INTEGER NOT NULL,
        kind TEXT NOT NULL,
        day TEXT NOT NULL,
        count INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (chat_id, kind, day)
    );

    CREATE INDEX IF NOT EXISTS idx_messages_chat_sequence ON messages(chat_id, sequence);
    CREATE INDEX IF NOT EXISTS idx_chats_unlimited ON chats(is_unlimited);
    CREATE INDEX IF NOT EXISTS idx_usage_day ON usage_counters(day, kind);
"#;

/// Counts written by [`SqliteBackend::import_snapshot`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub prompts: usize,
    pub counters: usize,
    pub messages: usize,
    pub unlimited: usize,
}

/// Relational [`StateBackend`].
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    codec: Box<dyn ContentCodec>,
    default_prompt: String,
}

impl SqliteBackend {
    /// Open (or create) the database file.
    pub fn open(
        path: &Path,
        default_prompt: impl Into<String>,
        codec: Box<dyn ContentCodec>,
    ) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let backend = Self::with_connection(conn, default_prompt.into(), codec)?;
        let (chats, messages) = backend.counts()?;
        info!("Loaded database from {:?} ({} chats, {} messages)", path, chats, messages);
        Ok(backend)
    }

    /// In-memory database with plain-text storage.
    pub fn in_memory(default_prompt: impl Into<String>) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, default_prompt.into(), Box::new(PlainCodec))
    }

    fn with_connection(
        conn: Connection,
        default_prompt: String,
        codec: Box<dyn ContentCodec>,
    ) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            codec,
            default_prompt,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn counts(&self) -> Result<(usize, usize), StorageError> {
        let conn = self.lock();
        let chats: i64 = conn.query_row("SELECT COUNT(*) FROM chats", [], |row| row.get(0))?;
        let messages: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok((chats as usize, messages as usize))
    }

    /// Copy a file-backend snapshot into this database.
    ///
    /// Existing rows for the same chats are overwritten; history sequences are
    /// kept as they were in the file.
    pub fn import_snapshot(
        &self,
        state: &PersistedState,
        whitelist: &[ChatId],
    ) -> Result<ImportReport, StorageError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_str();
        let mut report = ImportReport::default();

        for (chat, prompt) in &state.prompts {
            ensure_chat(&tx, *chat)?;
            tx.execute(
                "INSERT INTO system_prompts (chat_id, prompt_text, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(chat_id) DO UPDATE
                 SET prompt_text = excluded.prompt_text, updated_at = excluded.updated_at",
                params![chat, self.codec.encode(prompt)?, now],
            )?;
            report.prompts += 1;
        }

        let usage = [
            (QuotaKind::Text, &state.daily_usage),
            (QuotaKind::Image, &state.image_usage),
        ];
        for (kind, map) in usage {
            for (chat, (day, count)) in map {
                ensure_chat(&tx, *chat)?;
                tx.execute(
                    "INSERT INTO usage_counters (chat_id, kind, day, count) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(chat_id, kind, day) DO UPDATE SET count = excluded.count",
                    params![chat, kind.as_str(), day_str(*day), count],
                )?;
                report.counters += 1;
            }
        }

        for (chat, turns) in &state.histories {
            ensure_chat(&tx, *chat)?;
            tx.execute("DELETE FROM messages WHERE chat_id = ?1", params![chat])?;
            for turn in turns.iter().filter(|t| t.role != Role::System) {
                tx.execute(
                    "INSERT INTO messages (chat_id, role, content, sequence, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        chat,
                        turn.role.as_str(),
                        self.codec.encode(&turn.text)?,
                        turn.sequence as i64,
                        now
                    ],
                )?;
                report.messages += 1;
            }
            let last = state
                .sequences
                .get(chat)
                .copied()
                .unwrap_or(0)
                .max(turns.iter().map(|t| t.sequence).max().unwrap_or(0));
            tx.execute(
                "UPDATE chats SET next_sequence = MAX(next_sequence, ?2) WHERE chat_id = ?1",
                params![chat, last as i64 + 1],
            )?;
        }

        for (chat, info) in &state.chats {
            ensure_chat(&tx, *chat)?;
            update_info(&tx, *chat, info)?;
        }

        for chat in whitelist {
            ensure_chat(&tx, *chat)?;
            tx.execute("UPDATE chats SET is_unlimited = 1 WHERE chat_id = ?1", params![chat])?;
            report.unlimited += 1;
        }

        tx.commit()?;
        info!(
            "📥 Imported {} prompts, {} counters, {} messages, {} unlimited chats",
            report.prompts, report.counters, report.messages, report.unlimited
        );
        Ok(report)
    }
}

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

fn day_str(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

fn ensure_chat(conn: &Connection, chat: ChatId) -> Result<(), StorageError> {
    let now = now_str();
    conn.execute(
        "INSERT OR IGNORE INTO chats (chat_id, created_at, updated_at) VALUES (?1, ?2, ?2)",
        params![chat, now],
    )?;
    Ok(())
}

fn update_info(conn: &Connection, chat: ChatId, info: &ChatInfo) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE chats SET
            username = COALESCE(?2, username),
            first_name = COALESCE(?3, first_name),
            title = COALESCE(?4, title),
            updated_at = ?5
         WHERE chat_id = ?1",
        params![chat, info.username, info.first_name, info.title, now_str()],
    )?;
    Ok(())
}

fn count_for(
    conn: &Connection,
    chat: ChatId,
    kind: QuotaKind,
    day: NaiveDate,
) -> Result<u32, StorageError> {
    let count: Option<i64> = conn
        .query_row(
            "SELECT count FROM usage_counters WHERE chat_id = ?1 AND kind = ?2 AND day = ?3",
            params![chat, kind.as_str(), day_str(day)],
            |row| row.get(0),
        )
        .optional()?;
    Ok(count.unwrap_or(0) as u32)
}

fn clear_messages(tx: &Transaction<'_>, chat: ChatId) -> Result<(), StorageError> {
    tx.execute("DELETE FROM messages WHERE chat_id = ?1", params![chat])?;
    Ok(())
}

impl StateBackend for SqliteBackend {
    fn history(&self, chat: ChatId) -> Result<ConversationHistory, StorageError> {
        let conn = self.lock();

        let stored: Option<String> = conn
            .query_row(
                "SELECT prompt_text FROM system_prompts WHERE chat_id = ?1",
                params![chat],
                |row| row.get(0),
            )
            .optional()?;
        let prompt = match stored {
            Some(blob) => self.codec.decode(&blob)?,
            None => self.default_prompt.clone(),
        };

        let mut stmt = conn.prepare(
            "SELECT role, content, sequence FROM messages WHERE chat_id = ?1 ORDER BY sequence ASC",
        )?;
        let rows = stmt.query_map(params![chat], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
        })?;

        let mut turns = Vec::new();
        for row in rows {
            let (role, content, sequence) = row?;
            let role = Role::parse(&role).ok_or_else(|| {
                StorageError::Corrupt(format!("unknown role '{role}' in chat {chat}"))
            })?;
            turns.push(ConversationTurn {
                role,
                text: self.codec.decode(&content)?,
                sequence: sequence as u64,
            });
        }

        Ok(ConversationHistory::new(chat, &prompt, turns))
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
        let content = self.codec.encode(text)?;

        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_chat(&tx, chat)?;
        let sequence: i64 = tx.query_row(
            "SELECT next_sequence FROM chats WHERE chat_id = ?1",
            params![chat],
            |row| row.get(0),
        )?;
        tx.execute(
            "UPDATE chats SET next_sequence = ?2 WHERE chat_id = ?1",
            params![chat, sequence + 1],
        )?;
        tx.execute(
            "INSERT INTO messages (chat_id, role, content, sequence, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![chat, role.as_str(), content, sequence, now_str()],
        )?;
        tx.commit()?;

        Ok(ConversationTurn {
            role,
            text: text.to_string(),
            sequence: sequence as u64,
        })
    }

    fn truncate(&self, chat: ChatId, max_turns: usize) -> Result<usize, StorageError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stored: i64 = tx.query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
            params![chat],
            |row| row.get(0),
        )?;
        let extra = excess_turns(stored as usize, max_turns);
        if extra > 0 {
            tx.execute(
                "DELETE FROM messages WHERE id IN (
                    SELECT id FROM messages WHERE chat_id = ?1 ORDER BY sequence ASC LIMIT ?2
                 )",
                params![chat, extra as i64],
            )?;
            debug!("Truncated {} turns in chat {}", extra, chat);
        }
        tx.commit()?;
        Ok(extra)
    }

    fn reset_history(&self, chat: ChatId) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute("DELETE FROM messages WHERE chat_id = ?1", params![chat])?;
        Ok(())
    }

    fn set_system_prompt(&self, chat: ChatId, text: &str) -> Result<(), StorageError> {
        let blob = self.codec.encode(text)?;
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_chat(&tx, chat)?;
        tx.execute(
            "INSERT INTO system_prompts (chat_id, prompt_text, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id) DO UPDATE
             SET prompt_text = excluded.prompt_text, updated_at = excluded.updated_at",
            params![chat, blob, now_str()],
        )?;
        clear_messages(&tx, chat)?;
        tx.commit()?;
        Ok(())
    }

    fn clear_system_prompt(&self, chat: ChatId) -> Result<(), StorageError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM system_prompts WHERE chat_id = ?1", params![chat])?;
        clear_messages(&tx, chat)?;
        tx.commit()?;
        Ok(())
    }

    fn system_prompt(&self, chat: ChatId) -> Result<Option<String>, StorageError> {
        let conn = self.lock();
        let blob: Option<String> = conn
            .query_row(
                "SELECT prompt_text FROM system_prompts WHERE chat_id = ?1",
                params![chat],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.map(|b| self.codec.decode(&b)).transpose()?)
    }

    fn quota_count(
        &self,
        chat: ChatId,
        kind: QuotaKind,
        day: NaiveDate,
    ) -> Result<u32, StorageError> {
        let conn = self.lock();
        count_for(&conn, chat, kind, day)
    }

    fn increment_quota_if_under(
        &self,
        chat: ChatId,
        kind: QuotaKind,
        day: NaiveDate,
        limit: u32,
    ) -> Result<bool, StorageError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let count = count_for(&tx, chat, kind, day)?;
        if count >= limit {
            // Dropping the transaction rolls it back; nothing was written.
            return Ok(false);
        }
        ensure_chat(&tx, chat)?;
        tx.execute(
            "INSERT INTO usage_counters (chat_id, kind, day, count) VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(chat_id, kind, day) DO UPDATE SET count = count + 1",
            params![chat, kind.as_str(), day_str(day)],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn is_whitelisted(&self, chat: ChatId) -> Result<bool, StorageError> {
        let conn = self.lock();
        let flag: Option<bool> = conn
            .query_row(
                "SELECT is_unlimited FROM chats WHERE chat_id = ?1",
                params![chat],
                |row| row.get(0),
            )
            .optional()?;
        Ok(flag.unwrap_or(false))
    }

    fn set_whitelisted(&self, chat: ChatId, unlimited: bool) -> Result<bool, StorageError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if unlimited {
            ensure_chat(&tx, chat)?;
        }
        let changed = tx.execute(
            "UPDATE chats SET is_unlimited = ?2, updated_at = ?3
             WHERE chat_id = ?1 AND is_unlimited != ?2",
            params![chat, unlimited, now_str()],
        )?;
        tx.commit()?;
        Ok(changed > 0)
    }

    fn whitelisted(&self) -> Result<Vec<ChatId>, StorageError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT chat_id FROM chats WHERE is_unlimited = 1 ORDER BY chat_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn record_chat_info(&self, chat: ChatId, info: &ChatInfo) -> Result<(), StorageError> {
        if info.is_empty() {
            return Ok(());
        }
        let conn = self.lock();
        ensure_chat(&conn, chat)?;
        update_info(&conn, chat, info)
    }

    fn chat_info(&self, chat: ChatId) -> Result<Option<ChatInfo>, StorageError> {
        let conn = self.lock();
        let info = conn
            .query_row(
                "SELECT username, first_name, title FROM chats WHERE chat_id = ?1",
                params![chat],
                |row| {
                    Ok(ChatInfo {
                        username: row.get(0)?,
                        first_name: row.get(1)?,
                        title: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(info.filter(|i| !i.is_empty()))
    }

    fn stats(&self, day: NaiveDate) -> Result<UsageStats, StorageError> {
        let conn = self.lock();
        let total_chats: i64 = conn.query_row("SELECT COUNT(*) FROM chats", [], |row| row.get(0))?;
        let unlimited: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chats WHERE is_unlimited = 1",
            [],
            |row| row.get(0),
        )?;
        let messages: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        let today = |kind: QuotaKind| -> Result<i64, rusqlite::Error> {
            conn.query_row(
                "SELECT COALESCE(SUM(count), 0) FROM usage_counters WHERE kind = ?1 AND day = ?2",
                params![kind.as_str(), day_str(day)],
                |row| row.get(0),
            )
        };
        Ok(UsageStats {
            total_chats: total_chats as usize,
            unlimited_chats: unlimited as usize,
            total_messages: messages as usize,
            text_requests_today: today(QuotaKind::Text)? as u32,
            image_requests_today: today(QuotaKind::Image)? as u32,
        })
    }
}
