//! 进程内的重置令牌缓存，按注入的时钟判断 TTL。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::cache::ResetTokenCache;
use crate::cache::keys::reset_token_key;
use crate::cache::models::reset_token::CachedResetToken;
use crate::error::StoreError;
use crate::utils::Clock;

struct Entry {
    value: CachedResetToken,
    expires_at: DateTime<Utc>,
}

pub struct MemoryResetTokenCache {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryResetTokenCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// 取出并顺带淘汰过期条目
    fn live_entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, e| e.expires_at > now);
        entries
    }

    /// 剩余 TTL（秒），条目不存在时为 `None`
    pub fn ttl_of(&self, token: &str) -> Option<i64> {
        let now = self.clock.now();
        self.live_entries()
            .get(&reset_token_key(token))
            .map(|e| (e.expires_at - now).num_seconds())
    }
}

#[async_trait]
impl ResetTokenCache for MemoryResetTokenCache {
    async fn store(
        &self,
        token: &str,
        entry: &CachedResetToken,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let expires_at = self.clock.now() + Duration::seconds(ttl_secs.max(1) as i64);
        self.live_entries().insert(
            reset_token_key(token),
            Entry {
                value: entry.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<CachedResetToken>, StoreError> {
        Ok(self
            .live_entries()
            .get(&reset_token_key(token))
            .map(|e| e.value.clone()))
    }

    async fn mark_used(&self, token: &str, used_ttl_secs: u64) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.live_entries();
        match entries.get_mut(&reset_token_key(token)) {
            Some(entry) => {
                entry.value.mark_used(now.timestamp());
                entry.expires_at = now + Duration::seconds(used_ttl_secs.max(1) as i64);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.live_entries().remove(&reset_token_key(token)).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use uuid::Uuid;

    #[tokio::test]
    async fn entries_expire_with_the_clock() {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = MemoryResetTokenCache::new(clock.clone());
        let entry = CachedResetToken::new(Uuid::new_v4(), "a@b.c", clock.now().timestamp());

        cache.store("tok", &entry, 3600).await.unwrap();
        assert_eq!(cache.get("tok").await.unwrap(), Some(entry));

        clock.advance(Duration::seconds(3601));
        assert_eq!(cache.get("tok").await.unwrap(), None);
    }

    #[tokio::test]
    async fn mark_used_shortens_ttl() {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = MemoryResetTokenCache::new(clock.clone());
        let entry = CachedResetToken::new(Uuid::new_v4(), "a@b.c", clock.now().timestamp());
        cache.store("tok", &entry, 3600).await.unwrap();

        assert!(cache.mark_used("tok", 300).await.unwrap());
        let stored = cache.get("tok").await.unwrap().unwrap();
        assert!(stored.used);
        assert!(stored.used_at.is_some());
        assert!(cache.ttl_of("tok").unwrap() <= 300);

        clock.advance(Duration::seconds(301));
        assert!(cache.get("tok").await.unwrap().is_none());
        assert!(!cache.mark_used("tok", 300).await.unwrap());
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = MemoryResetTokenCache::new(clock.clone());
        let entry = CachedResetToken::new(Uuid::new_v4(), "a@b.c", 0);
        cache.store("tok", &entry, 60).await.unwrap();
        assert!(cache.delete("tok").await.unwrap());
        assert!(!cache.delete("tok").await.unwrap());
    }
}
