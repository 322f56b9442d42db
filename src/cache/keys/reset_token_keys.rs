use sha2::{Digest, Sha256};

/// 重置令牌缓存键前缀
const RESET_TOKEN_PREFIX: &str = "password_reset:";

/// 生成重置令牌缓存键
///
/// 键中使用令牌的摘要，避免在 Redis 中明文保存签名令牌。
pub fn reset_token_key(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{}{:x}", RESET_TOKEN_PREFIX, hasher.finalize())
}
