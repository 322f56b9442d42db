use axum::Json;
use bcrypt::{hash, verify};
use serde::Serialize;

use crate::api::schema::common::ApiResponse;

pub mod background;
pub mod clock;
pub mod tokens;

pub use background::{best_effort, spawn_best_effort, with_timeout};
pub use clock::{Clock, ManualClock, SystemClock};
pub use tokens::{
    ResetClaims, ResetTokenError, generate_session_token, hash_session_token, sign_reset_token,
    token_preview, verify_reset_token,
};

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    hash(password.as_bytes(), cost)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password.as_bytes(), hash)
}

/// 在阻塞线程池中计算 bcrypt 哈希，避免占用异步运行时
pub async fn hash_password_blocking(
    password: String,
    cost: u32,
) -> Result<String, bcrypt::BcryptError> {
    tokio::task::spawn_blocking(move || hash_password(&password, cost))
        .await
        .unwrap_or(Err(bcrypt::BcryptError::InvalidHash(
            "hashing task panicked".to_string(),
        )))
}

/// 在阻塞线程池中校验密码
pub async fn verify_password_blocking(
    password: String,
    hash: String,
) -> Result<bool, bcrypt::BcryptError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .unwrap_or(Err(bcrypt::BcryptError::InvalidHash(
            "verification task panicked".to_string(),
        )))
}

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: error_codes::SUCCESS,
        msg: "success".into(),
        resp_data: Some(data),
    })
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const USER_EXISTS: i32 = 1001;
    pub const AUTH_FAILED: i32 = 1002;
    pub const NOT_FOUND: i32 = 1004;
    pub const INVALID_TOKEN: i32 = 1006;
    pub const TOKEN_ALREADY_USED: i32 = 1007;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5003;
}
