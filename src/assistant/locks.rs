use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::types::ChatId;

/// One async mutex per chat. Requests for the same chat run one at a time,
/// requests for different chats don't wait on each other.
#[derive(Default)]
pub struct ChatLocks {
    locks: Mutex<HashMap<ChatId, Arc<AsyncMutex<()>>>>,
}

impl ChatLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, chat: ChatId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Only the map holds idle entries; held or awaited ones have clones out.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(chat).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
