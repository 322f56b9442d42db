//! 会话令牌与密码重置令牌。
//!
//! 会话令牌是不透明的随机串，数据库中只保存其 SHA-256 摘要；
//! 重置令牌是 HS256 签名的 JWT，自带用户 ID、类型和过期时间。

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// 64 位字母数字字符，约 381 bit 熵
const SESSION_TOKEN_LEN: usize = 64;
/// 日志中保留的令牌前缀长度
const TOKEN_PREVIEW_LEN: usize = 10;

pub const PASSWORD_RESET_TYPE: &str = "password-reset";

/// 生成会话令牌（线程本地 CSPRNG）
pub fn generate_session_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_TOKEN_LEN)
        .map(char::from)
        .collect()
}

pub fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// 日志专用：只输出令牌前 10 个字符
pub fn token_preview(token: &str) -> String {
    let prefix: String = token.chars().take(TOKEN_PREVIEW_LEN).collect();
    format!("{prefix}…")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResetClaims {
    pub sub: Uuid,
    pub email: String,
    #[serde(rename = "typ")]
    pub kind: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResetTokenError {
    #[error("token signature or structure is invalid")]
    InvalidSignature,
    #[error("token is not a password-reset token")]
    WrongType,
    #[error("token has expired")]
    Expired,
}

pub fn sign_reset_token(
    user_id: Uuid,
    email: &str,
    now: DateTime<Utc>,
    ttl: Duration,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = ResetClaims {
        sub: user_id,
        email: email.to_string(),
        kind: PASSWORD_RESET_TYPE.to_string(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
        jti: Uuid::new_v4().to_string(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// 依次校验签名、类型、过期时间
///
/// 过期时间由调用方传入的 `now` 判断，而不是系统时钟。
pub fn verify_reset_token(
    token: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<ResetClaims, ResetTokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.set_required_spec_claims(&["exp", "sub"]);

    let claims = decode::<ResetClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| ResetTokenError::InvalidSignature)?
    .claims;

    if claims.kind != PASSWORD_RESET_TYPE {
        return Err(ResetTokenError::WrongType);
    }
    if claims.exp <= now.timestamp() {
        return Err(ResetTokenError::Expired);
    }
    Ok(claims)
}
