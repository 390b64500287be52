//! Error types for storage, providers, transport, and the request workflow.

use crate::assistant::types::{QuotaKind, Role};

/// Failure while encoding or decoding stored text.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed: wrong key or corrupted data")]
    Decrypt,
    #[error("stored blob is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decrypted text is not valid UTF-8")]
    Utf8,
}

/// Any persistence failure. Never means "quota exceeded" or "not allowed".
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("corrupt stored data: {0}")]
    Corrupt(String),
    #[error("{0} turns cannot be appended; use the system prompt operations")]
    InvalidTurn(Role),
}

impl StorageError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Failure of the completion or image-generation backend.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty response")]
    Empty,
    #[error("timed out after {0}s")]
    Timeout(u64),
}

/// Outbound chat delivery failure.
#[derive(Debug, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Everything that can end a user request early. Each variant maps to one reply.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("access denied")]
    AuthorizationDenied,
    #[error("daily {kind} limit of {limit} reached")]
    QuotaExceeded { kind: QuotaKind, limit: u32 },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("provider failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),
}

impl RequestError {
    /// The text shown to the user for this outcome.
    pub fn user_message(&self) -> String {
        match self {
            RequestError::AuthorizationDenied => {
                "🚫 Access denied. Only administrators and whitelisted chats can do this."
                    .to_string()
            }
            RequestError::QuotaExceeded { kind: QuotaKind::Text, limit } => format!(
                "🚫 The daily limit of {limit} requests has been reached. Please try again tomorrow."
            ),
            RequestError::QuotaExceeded { kind: QuotaKind::Image, limit } => format!(
                "🚫 The daily image generation limit of {limit} requests has been reached. \
                 Please try again tomorrow."
            ),
            RequestError::Validation(msg) => format!("⚠️ {msg}"),
            RequestError::Provider(ProviderError::Timeout(_)) => {
                "⚠️ Error: the model took too long to respond. Please try again later.".to_string()
            }
            RequestError::Provider(_) => {
                "⚠️ Error: the model did not respond. Please try again later.".to_string()
            }
            RequestError::Storage(_) => {
                "⚠️ Something went wrong on our side. Please try again later.".to_string()
            }
        }
    }
}
