//! Daily per-chat quotas. Days roll over at UTC midnight.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::debug;

use super::backend::StateBackend;
use super::error::StorageError;
use super::types::{ChatId, QuotaKind};

/// Source of "today".
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// The UTC calendar date.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// A clock pinned to one date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub text: u32,
    pub image: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self { text: 15, image: 5 }
    }
}

impl QuotaLimits {
    pub fn for_kind(&self, kind: QuotaKind) -> u32 {
        match kind {
            QuotaKind::Text => self.text,
            QuotaKind::Image => self.image,
        }
    }
}

pub struct QuotaTracker {
    backend: Arc<dyn StateBackend>,
    limits: QuotaLimits,
    clock: Arc<dyn Clock>,
}

impl QuotaTracker {
    pub fn new(backend: Arc<dyn StateBackend>, limits: QuotaLimits) -> Self {
        Self::with_clock(backend, limits, Arc::new(SystemClock))
    }

    pub fn with_clock(
        backend: Arc<dyn StateBackend>,
        limits: QuotaLimits,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            limits,
            clock,
        }
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Whitelisted chats pass without touching their counter. Everyone else
    /// takes one slot, or gets `false` when today's slots are gone.
    pub fn allow_and_consume(&self, chat: ChatId, kind: QuotaKind) -> Result<bool, StorageError> {
        if self.backend.is_whitelisted(chat)? {
            debug!("Chat {} is unlimited, skipping {} quota", chat, kind);
            return Ok(true);
        }
        let limit = self.limits.for_kind(kind);
        let allowed = self
            .backend
            .increment_quota_if_under(chat, kind, self.clock.today(), limit)?;
        if !allowed {
            debug!("Chat {} hit the daily {} limit ({})", chat, kind, limit);
        }
        Ok(allowed)
    }

    /// Requests used today.
    pub fn used(&self, chat: ChatId, kind: QuotaKind) -> Result<u32, StorageError> {
        self.backend.quota_count(chat, kind, self.clock.today())
    }

    /// Requests left today; `None` for unlimited chats.
    pub fn remaining(&self, chat: ChatId, kind: QuotaKind) -> Result<Option<u32>, StorageError> {
        if self.backend.is_whitelisted(chat)? {
            return Ok(None);
        }
        let used = self.used(chat, kind)?;
        Ok(Some(self.limits.for_kind(kind).saturating_sub(used)))
    }
}
