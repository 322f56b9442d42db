use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient};

use crate::cache::ResetTokenCache;
use crate::cache::keys::reset_token_key;
use crate::cache::models::reset_token::CachedResetToken;
use crate::error::{StoreError, classify_redis_error};
use crate::utils::{Clock, token_preview, with_timeout};

/// 重置令牌缓存操作（Redis）
pub struct ResetTokenCacheOperations {
    redis: Arc<RedisClient>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl ResetTokenCacheOperations {
    pub fn new(redis: Arc<RedisClient>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            redis,
            clock,
            timeout,
        }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.redis
            .get_multiplexed_async_connection()
            .await
            .map_err(classify_redis_error)
    }

    async fn write(&self, token: &str, entry: &CachedResetToken, ttl: u64) -> Result<(), StoreError> {
        let json = serde_json::to_string(entry)
            .map_err(|e| StoreError::Other(format!("序列化错误: {e}")))?;
        let key = reset_token_key(token);

        with_timeout(self.timeout, async {
            let mut conn = self.connection().await?;
            let _: () = conn
                .set_ex(key, json, ttl.max(1))
                .await
                .map_err(classify_redis_error)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ResetTokenCache for ResetTokenCacheOperations {
    async fn store(
        &self,
        token: &str,
        entry: &CachedResetToken,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        self.write(token, entry, ttl_secs).await?;
        tracing::debug!(token = %token_preview(token), ttl_secs, "Cached reset token");
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<CachedResetToken>, StoreError> {
        let key = reset_token_key(token);
        let result: Option<String> = with_timeout(self.timeout, async {
            let mut conn = self.connection().await?;
            conn.get(key).await.map_err(classify_redis_error)
        })
        .await?;

        match result {
            Some(json) => {
                let cached = serde_json::from_str(&json)
                    .map_err(|e| StoreError::Other(format!("反序列化错误: {e}")))?;
                Ok(Some(cached))
            }
            None => Ok(None),
        }
    }

    async fn mark_used(&self, token: &str, used_ttl_secs: u64) -> Result<bool, StoreError> {
        let Some(mut entry) = self.get(token).await? else {
            return Ok(false);
        };
        entry.mark_used(self.clock.now().timestamp());
        // 缩短保留时间，足够拦截重放即可
        self.write(token, &entry, used_ttl_secs).await?;
        tracing::debug!(token = %token_preview(token), "Marked reset token as used");
        Ok(true)
    }

    async fn delete(&self, token: &str) -> Result<bool, StoreError> {
        let key = reset_token_key(token);
        let removed: i64 = with_timeout(self.timeout, async {
            let mut conn = self.connection().await?;
            conn.del(key).await.map_err(classify_redis_error)
        })
        .await?;
        Ok(removed > 0)
    }
}
