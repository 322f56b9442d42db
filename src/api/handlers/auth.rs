use axum::{
    body::Bytes,
    extract::{Extension, Json, Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    AppState,
    api::schema::{
        ApiResponse, ExtendSessionRequest, ExtendSessionResponse, ForgotPasswordRequest,
        InvalidatedSessionsResponse, LoginRequest, LogoutResponse, RegisterRequest,
        ResetPasswordRequest,
    },
    error::{AuthError, AuthResult},
    middleware::{CurrentSession, RequestMeta},
    services::{ActionOutcome, AuthOutcome, SessionView},
    utils::success_to_api_response,
};

type ApiResult<T> = AuthResult<Json<ApiResponse<T>>>;

/// 注册并直接登录
#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    RequestMeta(meta): RequestMeta,
    Json(req): Json<RegisterRequest>,
) -> AuthResult<(StatusCode, Json<ApiResponse<AuthOutcome>>)> {
    let outcome = state.auth.register(req, meta).await?;
    Ok((StatusCode::CREATED, success_to_api_response(outcome)))
}

/// 邮箱密码登录
#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    RequestMeta(meta): RequestMeta,
    Json(req): Json<LoginRequest>,
) -> ApiResult<AuthOutcome> {
    let outcome = state.auth.login(req, meta).await?;
    Ok(success_to_api_response(outcome))
}

/// 注销当前会话
#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
) -> ApiResult<LogoutResponse> {
    let invalidated = state.auth.logout(&current.token).await?;
    Ok(success_to_api_response(LogoutResponse { invalidated }))
}

/// 注销当前用户的所有会话
#[axum::debug_handler]
pub async fn logout_all(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
) -> ApiResult<InvalidatedSessionsResponse> {
    let invalidated = state.auth.logout_all(current.user_id).await?;
    Ok(success_to_api_response(InvalidatedSessionsResponse { invalidated }))
}

/// 延长当前会话；不传小时数时按会话类型重新计算
#[axum::debug_handler]
pub async fn extend_session(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    body: Bytes,
) -> ApiResult<ExtendSessionResponse> {
    // 请求体可省略
    let req: ExtendSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ExtendSessionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AuthError::Validation(e.to_string()))?
    };

    let extended = state.auth.extend_session(&current.token, req.hours).await?;
    Ok(success_to_api_response(ExtendSessionResponse { extended }))
}

/// 申请重置密码，响应与邮箱是否存在无关
#[axum::debug_handler]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> ApiResult<ActionOutcome> {
    let outcome = state.auth.forgot_password(&req.email).await?;
    Ok(success_to_api_response(outcome))
}

/// 使用重置令牌设置新密码
#[axum::debug_handler]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> ApiResult<ActionOutcome> {
    let outcome = state
        .auth
        .reset_password(&req.token, &req.new_password)
        .await?;
    Ok(success_to_api_response(outcome))
}

/// 列出当前用户的活跃会话
#[axum::debug_handler]
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
) -> ApiResult<Vec<SessionView>> {
    let sessions = state
        .auth
        .list_sessions(current.user_id, Some(current.session_id))
        .await?;
    Ok(success_to_api_response(sessions))
}

/// 撤销当前用户的指定会话
#[axum::debug_handler]
pub async fn revoke_session(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<()> {
    state.auth.revoke_session(current.user_id, session_id).await?;
    Ok(success_to_api_response(()))
}
