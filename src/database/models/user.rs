use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// 用户数据库实体
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserEntity {
    pub id: Uuid,
    /// 已规范化（去空白、小写）的邮箱
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// 不要求唯一
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub country: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// 可编辑的资料字段，`None` 表示保持原值
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFields {
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub country: Option<String>,
}

/// 插入用户所需的数据，密码必须已经哈希
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub profile: ProfileFields,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
