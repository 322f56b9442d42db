use serde::{Deserialize, Serialize};

// 注册、登录、资料更新的请求体直接使用服务层的输入类型
pub use crate::services::{
    LoginInput as LoginRequest, ProfileUpdateInput as UpdateProfileRequest,
    RegisterInput as RegisterRequest,
};

// 找回密码请求
#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

// 重置密码请求
#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

// 修改密码请求
#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

// 延长会话请求
#[derive(Debug, Default, Deserialize)]
pub struct ExtendSessionRequest {
    pub hours: Option<i64>,
}

// 登出响应
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub invalidated: bool,
}

// 全部登出 / 修改密码响应
#[derive(Debug, Serialize)]
pub struct InvalidatedSessionsResponse {
    pub invalidated: u64,
}

// 延长会话响应
#[derive(Debug, Serialize)]
pub struct ExtendSessionResponse {
    pub extended: bool,
}
