use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::config::{
    AuthSettings, DEFAULT_REMEMBER_ME_TTL_HOURS, DEFAULT_SESSION_TTL_HOURS, MAX_CONFIG_HOURS,
};
use crate::database::models::user::UserEntity;

/// 会话数据库实体
///
/// 令牌本身不落库，`token_hash` 为其 SHA-256 摘要。
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionEntity {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub user_id: Uuid,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub device_fingerprint: Option<String>,
    pub remember_me: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

/// 会话状态，PURGED 即行已被清理，不在此表示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Expired,
    Invalidated,
}

impl SessionEntity {
    pub fn state(&self, now: DateTime<Utc>) -> SessionState {
        if !self.is_active {
            SessionState::Invalidated
        } else if self.expires_at <= now {
            SessionState::Expired
        } else {
            SessionState::Active
        }
    }

    /// 清理任务会删除的行：已过期或已失效
    pub fn is_sweepable(&self, now: DateTime<Utc>) -> bool {
        self.state(now) != SessionState::Active
    }
}

/// 创建会话的输入
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub user_id: Uuid,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub device_fingerprint: Option<String>,
    pub remember_me: bool,
}

/// 新建的会话，`token` 只在这里出现一次
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session: SessionEntity,
    pub token: String,
}

/// 验证通过的会话及其所属用户
#[derive(Debug, Clone)]
pub struct SessionWithUser {
    pub session: SessionEntity,
    pub user: UserEntity,
}

/// 会话有效期策略
#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub default_ttl: Duration,
    pub remember_me_ttl: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from_hours(DEFAULT_SESSION_TTL_HOURS, DEFAULT_REMEMBER_ME_TTL_HOURS)
    }
}

impl SessionPolicy {
    /// 小时数被限制在 1..=MAX_CONFIG_HOURS
    pub fn from_hours(default_hours: i64, remember_me_hours: i64) -> Self {
        Self {
            default_ttl: Duration::hours(default_hours.clamp(1, MAX_CONFIG_HOURS)),
            remember_me_ttl: Duration::hours(remember_me_hours.clamp(1, MAX_CONFIG_HOURS)),
        }
    }

    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::from_hours(settings.session_ttl_hours, settings.remember_me_ttl_hours)
    }

    pub fn ttl_for(&self, remember_me: bool) -> Duration {
        if remember_me {
            self.remember_me_ttl
        } else {
            self.default_ttl
        }
    }
}
