// 数据库模块
// 用户凭据存储与会话存储：接口定义、Postgres 实现和进程内实现

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;

pub mod memory;
pub mod models;
pub mod repositories;

pub use memory::MemoryDatabase;
pub use models::{
    CreatedSession, NewSession, NewUser, ProfileFields, SessionEntity, SessionPolicy,
    SessionState, SessionWithUser, UserEntity,
};
pub use repositories::{SessionRepository, UserRepository};

/// 用户凭据存储
#[async_trait]
pub trait UserStore: Send + Sync {
    /// 邮箱已存在时返回 [`StoreError::DuplicateKey`]
    async fn create(&self, new_user: NewUser) -> Result<UserEntity, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<UserEntity>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserEntity>, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<UserEntity>, StoreError>;

    async fn update_password(&self, id: Uuid, new_hash: &str) -> Result<(), StoreError>;

    /// 用户不存在时返回 [`StoreError::NotFound`]
    async fn update_profile(
        &self,
        id: Uuid,
        fields: &ProfileFields,
    ) -> Result<UserEntity, StoreError>;

    async fn update_last_login(&self, id: Uuid) -> Result<(), StoreError>;

    /// 软停用 / 重新启用
    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError>;

    /// 物理删除，级联删除其会话
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// 会话存储
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, new_session: NewSession) -> Result<CreatedSession, StoreError>;

    /// 令牌不存在、已过期、已失效或用户已停用时返回 `Ok(None)`。
    /// 成功时顺带刷新最后活跃时间，刷新失败不影响结果。
    async fn validate(&self, token: &str) -> Result<Option<SessionWithUser>, StoreError>;

    async fn invalidate(&self, token: &str) -> Result<bool, StoreError>;

    /// 只失效属于该用户的指定会话
    async fn invalidate_by_id(&self, user_id: Uuid, session_id: Uuid)
    -> Result<bool, StoreError>;

    async fn invalidate_all_for_user(&self, user_id: Uuid) -> Result<u64, StoreError>;

    /// 按最后活跃时间倒序
    async fn list_active_for_user(&self, user_id: Uuid) -> Result<Vec<SessionEntity>, StoreError>;

    async fn cleanup_expired(&self) -> Result<u64, StoreError>;

    /// `hours` 为空时按会话的记住我标志重新套用 24h / 720h
    async fn extend_expiry(&self, token: &str, hours: Option<i64>) -> Result<bool, StoreError>;
}
