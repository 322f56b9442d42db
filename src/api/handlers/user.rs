use axum::extract::{Extension, Json, State};

use crate::{
    AppState,
    api::schema::{
        ApiResponse, ChangePasswordRequest, InvalidatedSessionsResponse, UpdateProfileRequest,
    },
    error::AuthResult,
    middleware::CurrentSession,
    services::ProfileView,
    utils::success_to_api_response,
};

/// 获取当前用户资料
#[axum::debug_handler]
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
) -> AuthResult<Json<ApiResponse<ProfileView>>> {
    let profile = state.auth.get_profile(current.user_id).await?;
    Ok(success_to_api_response(profile))
}

/// 更新昵称、显示名、国家，未提供的字段保持不变
#[axum::debug_handler]
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Json(req): Json<UpdateProfileRequest>,
) -> AuthResult<Json<ApiResponse<ProfileView>>> {
    let profile = state.auth.update_profile(current.user_id, req).await?;
    Ok(success_to_api_response(profile))
}

/// 修改密码，成功后包括当前会话在内全部失效
#[axum::debug_handler]
pub async fn change_password(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Json(req): Json<ChangePasswordRequest>,
) -> AuthResult<Json<ApiResponse<InvalidatedSessionsResponse>>> {
    let invalidated = state
        .auth
        .change_password(current.user_id, &req.current_password, &req.new_password)
        .await?;
    Ok(success_to_api_response(InvalidatedSessionsResponse { invalidated }))
}
