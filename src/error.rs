use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::api::schema::common::ApiResponse;
use crate::utils::error_codes;

/// 存储层错误
///
/// 只在存储适配器中由原生错误（sqlx / redis）转换而来，
/// 上层不再直接接触驱动的错误类型。
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("record not found")]
    NotFound,
    #[error("store call timed out")]
    Timeout,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store error: {0}")]
    Other(String),
}

/// Postgres 唯一约束冲突
const PG_UNIQUE_VIOLATION: &str = "23505";

/// 将 sqlx 原生错误映射为 [`StoreError`]
pub fn classify_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::PoolTimedOut => StoreError::Timeout,
        sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StoreError::Unavailable(err.to_string())
        }
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some(PG_UNIQUE_VIOLATION) {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                return StoreError::DuplicateKey(constraint);
            }
            // 57014: statement_timeout 触发的取消
            if db_err.code().as_deref() == Some("57014") {
                return StoreError::Timeout;
            }
            StoreError::Other(db_err.to_string())
        }
        other => StoreError::Other(other.to_string()),
    }
}

/// 将 redis 原生错误映射为 [`StoreError`]
pub fn classify_redis_error(err: redis::RedisError) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout
    } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Other(err.to_string())
    }
}

/// 认证业务错误
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("an account with this email already exists")]
    DuplicateKey,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    TokenExpired,
    #[error("token already used")]
    TokenAlreadyUsed,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("unauthorized")]
    Unauthorized,
    #[error("store call timed out")]
    Timeout,
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey(_) => AuthError::DuplicateKey,
            StoreError::NotFound => AuthError::NotFound("record"),
            StoreError::Timeout => {
                tracing::error!("Store call timed out");
                AuthError::Timeout
            }
            StoreError::Unavailable(detail) => {
                tracing::error!(error = %detail, "Store unavailable");
                AuthError::StoreUnavailable(detail)
            }
            StoreError::Other(detail) => {
                tracing::error!(error = %detail, "Store error");
                AuthError::Internal(detail)
            }
        }
    }
}

impl From<bcrypt::BcryptError> for AuthError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AuthError::Internal(format!("password hashing failed: {err}"))
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(errs: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = errs
            .field_errors()
            .into_iter()
            .map(|(field, errors)| {
                let reason = errors
                    .iter()
                    .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| "is invalid".to_string());
                format!("{field} {reason}")
            })
            .collect();
        fields.sort();
        AuthError::Validation(fields.join("; "))
    }
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::DuplicateKey => StatusCode::CONFLICT,
            AuthError::InvalidCredentials | AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
            AuthError::InvalidToken | AuthError::TokenExpired | AuthError::TokenAlreadyUsed => {
                StatusCode::BAD_REQUEST
            }
            AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::Timeout | AuthError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            AuthError::Validation(_) => error_codes::VALIDATION_ERROR,
            AuthError::DuplicateKey => error_codes::USER_EXISTS,
            AuthError::InvalidCredentials | AuthError::Unauthorized => error_codes::AUTH_FAILED,
            // 对外合并：无效与过期使用同一错误码
            AuthError::InvalidToken | AuthError::TokenExpired => error_codes::INVALID_TOKEN,
            AuthError::TokenAlreadyUsed => error_codes::TOKEN_ALREADY_USED,
            AuthError::NotFound(_) => error_codes::NOT_FOUND,
            AuthError::Timeout | AuthError::StoreUnavailable(_) => error_codes::SERVICE_UNAVAILABLE,
            AuthError::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            AuthError::Validation(detail) => format!("请求参数无效: {detail}"),
            AuthError::DuplicateKey => "该邮箱已被注册".to_string(),
            AuthError::InvalidCredentials => "邮箱或密码错误".to_string(),
            AuthError::InvalidToken | AuthError::TokenExpired => "重置链接无效或已过期".to_string(),
            AuthError::TokenAlreadyUsed => "重置链接已被使用".to_string(),
            AuthError::NotFound(_) => "资源不存在".to_string(),
            AuthError::Unauthorized => "未授权访问".to_string(),
            AuthError::Timeout | AuthError::StoreUnavailable(_) => "服务暂时不可用".to_string(),
            AuthError::Internal(_) => "内部服务器错误".to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let msg = if cfg!(debug_assertions) && status.is_server_error() {
            format!("{} ({})", self.public_message(), self)
        } else {
            self.public_message()
        };

        let body = Json(ApiResponse::<()> {
            code: self.code(),
            msg,
            resp_data: None,
        });

        (status, body).into_response()
    }
}
