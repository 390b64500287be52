use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::assistant::codec::{AesGcmCodec, ContentCodec, PlainCodec};
use crate::assistant::error::StorageError;
use crate::assistant::{
    JsonFileBackend, OrchestratorSettings, QuotaLimits, SqliteBackend, StateBackend,
};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file '{}': {source}", .path.display())]
    ParseJson {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("config validation error: {0}")]
    Validation(String),
}

#[derive(Deserialize)]
struct DatabaseFile {
    #[serde(default = "default_db_path")]
    path: String,
    /// Passphrase for encrypting prompts and messages at rest.
    encryption_key: Option<String>,
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    #[serde(default)]
    yc_folder_id: String,
    #[serde(default)]
    yc_api_key: String,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_image_model")]
    image_model: String,
    /// Directory for state files (logs, state, database). Defaults to current directory.
    data_dir: Option<String>,
    #[serde(default = "default_state_file")]
    state_file: String,
    #[serde(default = "default_whitelist_file")]
    unlimited_chat_ids_file: String,
    #[serde(default = "default_max_history_turns")]
    max_history_turns: usize,
    #[serde(default = "default_temperature")]
    gpt_temperature: f32,
    #[serde(default = "default_max_question_len")]
    max_question_len: usize,
    #[serde(default = "default_daily_limit")]
    daily_limit: u32,
    #[serde(default = "default_image_limit")]
    image_generation_limit: u32,
    #[serde(default)]
    system_prompt: String,
    #[serde(default)]
    admin_ids: Vec<i64>,
    /// Chats allowed to use the bot. Empty = everyone.
    #[serde(default)]
    allowed_chats: Vec<i64>,
    #[serde(default = "default_true")]
    restrict_setprompt: bool,
    #[serde(default)]
    use_database: bool,
    #[serde(default)]
    database: Option<DatabaseFile>,
    #[serde(default = "default_provider_timeout")]
    provider_timeout_secs: u64,
    log_chat_id: Option<i64>,
}

fn default_model() -> String {
    "yandexgpt".to_string()
}

fn default_image_model() -> String {
    "yandex-art".to_string()
}

fn default_state_file() -> String {
    "state.json".to_string()
}

fn default_whitelist_file() -> String {
    "unlimited_chats.txt".to_string()
}

fn default_db_path() -> String {
    "askbot.db".to_string()
}

fn default_max_history_turns() -> usize {
    10
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_question_len() -> usize {
    4000
}

fn default_daily_limit() -> u32 {
    15
}

fn default_image_limit() -> u32 {
    5
}

fn default_provider_timeout() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub encryption_key: Option<String>,
}

#[derive(Debug)]
pub struct Config {
    pub telegram_bot_token: String,
    pub yc_folder_id: String,
    pub yc_api_key: String,
    pub model: String,
    pub image_model: String,
    /// Directory for state files (logs, state, database).
    pub data_dir: PathBuf,
    pub state_file: PathBuf,
    pub unlimited_chat_ids_file: PathBuf,
    pub max_history_turns: usize,
    pub gpt_temperature: f32,
    pub max_question_len: usize,
    pub daily_limit: u32,
    pub image_generation_limit: u32,
    /// Default system prompt for chats without an override.
    pub system_prompt: String,
    pub admin_ids: HashSet<i64>,
    pub allowed_chats: HashSet<i64>,
    pub restrict_setprompt: bool,
    /// `Some` when `use_database` is on.
    pub database: Option<DatabaseConfig>,
    pub provider_timeout_secs: u64,
    pub log_chat_id: Option<i64>,
}

/// Relative paths are taken from `data_dir`.
fn resolve(data_dir: &Path, path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() { path } else { data_dir.join(path) }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile {
                path: config_path.clone(),
                source: e,
            })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson {
                path: config_path.clone(),
                source: e,
            })?;

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2
            || token_parts[0].parse::<u64>().is_err()
            || token_parts[1].is_empty()
        {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)"
                    .into(),
            ));
        }
        if file.yc_folder_id.trim().is_empty() || file.yc_api_key.trim().is_empty() {
            return Err(ConfigError::Validation("yc_folder_id and yc_api_key are required".into()));
        }
        if file.system_prompt.trim().is_empty() {
            return Err(ConfigError::Validation("system_prompt must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&file.gpt_temperature) {
            return Err(ConfigError::Validation(format!(
                "gpt_temperature must be between 0 and 1, got {}",
                file.gpt_temperature
            )));
        }
        if file.max_history_turns == 0 {
            return Err(ConfigError::Validation("max_history_turns must be at least 1".into()));
        }
        if file.max_question_len == 0 {
            return Err(ConfigError::Validation("max_question_len must be at least 1".into()));
        }
        if file.provider_timeout_secs == 0 {
            return Err(ConfigError::Validation("provider_timeout_secs must be at least 1".into()));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let database = if file.use_database {
            let db = file.database.unwrap_or_else(|| DatabaseFile {
                path: default_db_path(),
                encryption_key: None,
            });
            Some(DatabaseConfig {
                path: resolve(&data_dir, &db.path),
                encryption_key: db.encryption_key.filter(|k| !k.is_empty()),
            })
        } else {
            None
        };

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            yc_folder_id: file.yc_folder_id,
            yc_api_key: file.yc_api_key,
            model: file.model,
            image_model: file.image_model,
            state_file: resolve(&data_dir, &file.state_file),
            unlimited_chat_ids_file: resolve(&data_dir, &file.unlimited_chat_ids_file),
            data_dir,
            max_history_turns: file.max_history_turns,
            gpt_temperature: file.gpt_temperature,
            max_question_len: file.max_question_len,
            daily_limit: file.daily_limit,
            image_generation_limit: file.image_generation_limit,
            system_prompt: file.system_prompt,
            admin_ids: file.admin_ids.into_iter().collect(),
            allowed_chats: file.allowed_chats.into_iter().collect(),
            restrict_setprompt: file.restrict_setprompt,
            database,
            provider_timeout_secs: file.provider_timeout_secs,
            log_chat_id: file.log_chat_id,
        })
    }

    pub fn quota_limits(&self) -> QuotaLimits {
        QuotaLimits {
            text: self.daily_limit,
            image: self.image_generation_limit,
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            temperature: self.gpt_temperature,
            max_question_len: self.max_question_len,
            allowed_chats: self.allowed_chats.clone(),
            admin_ids: self.admin_ids.clone(),
            restrict_setprompt: self.restrict_setprompt,
        }
    }

    /// The database codec: AES-GCM when a key is configured, plain text otherwise.
    pub fn content_codec(&self) -> Result<Box<dyn ContentCodec>, StorageError> {
        match self.database.as_ref().and_then(|db| db.encryption_key.as_deref()) {
            Some(key) => Ok(Box::new(AesGcmCodec::from_passphrase(key)?)),
            None => Ok(Box::new(PlainCodec)),
        }
    }

    /// Open the configured state backend.
    pub fn state_backend(&self) -> Result<Arc<dyn StateBackend>, StorageError> {
        match &self.database {
            Some(db) => {
                if let Some(parent) = db.path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
                }
                let codec = self.content_codec()?;
                let backend = SqliteBackend::open(&db.path, self.system_prompt.clone(), codec)?;
                info!("🗄️ Using SQLite state backend at {:?}", db.path);
                Ok(Arc::new(backend))
            }
            None => {
                let backend = JsonFileBackend::open(
                    &self.state_file,
                    &self.unlimited_chat_ids_file,
                    self.system_prompt.clone(),
                )?;
                info!("📄 Using JSON file state backend at {:?}", self.state_file);
                Ok(Arc::new(backend))
            }
        }
    }
}
