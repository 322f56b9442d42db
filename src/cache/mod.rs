// 缓存模块
// 密码重置令牌的短期存储：接口、Redis 实现和进程内实现

use async_trait::async_trait;

use crate::error::StoreError;

pub mod keys;
pub mod memory;
pub mod models;
pub mod operations;

pub use memory::MemoryResetTokenCache;
pub use models::CachedResetToken;
pub use operations::ResetTokenCacheOperations;

/// 重置令牌缓存
///
/// 令牌先经过签名校验，这里只负责"是否已被使用"的二次检查。
#[async_trait]
pub trait ResetTokenCache: Send + Sync {
    async fn store(
        &self,
        token: &str,
        entry: &CachedResetToken,
        ttl_secs: u64,
    ) -> Result<(), StoreError>;

    async fn get(&self, token: &str) -> Result<Option<CachedResetToken>, StoreError>;

    /// 标记为已使用并把保留时间缩短为 `used_ttl_secs`；记录不存在时返回 `false`
    async fn mark_used(&self, token: &str, used_ttl_secs: u64) -> Result<bool, StoreError>;

    async fn delete(&self, token: &str) -> Result<bool, StoreError>;
}
