use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 密码重置令牌缓存数据模型
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CachedResetToken {
    pub user_id: Uuid,
    pub email: String,
    pub used: bool,
    pub created_at: i64,       // Unix timestamp
    pub used_at: Option<i64>,  // Unix timestamp
}

impl CachedResetToken {
    pub fn new(user_id: Uuid, email: &str, created_at: i64) -> Self {
        Self {
            user_id,
            email: email.to_string(),
            used: false,
            created_at,
            used_at: None,
        }
    }

    pub fn mark_used(&mut self, at: i64) {
        self.used = true;
        self.used_at = Some(at);
    }
}
