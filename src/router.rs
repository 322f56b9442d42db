use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;

use crate::{
    AppState,
    api::handlers::{auth, user},
    middleware::{auth_middleware, log_errors},
};

// 无需登录的认证路由
fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
}

// 需要有效会话的路由
fn protected_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/logout-all", post(auth::logout_all))
        .route("/auth/extend", post(auth::extend_session))
        .route("/auth/sessions", get(auth::list_sessions))
        .route("/auth/sessions/{session_id}", delete(auth::revoke_session))
        .route("/users/me", get(user::get_profile).put(user::update_profile))
        .route("/users/me/password", put(user::change_password))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
}

/// 组装完整路由并挂载状态
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(public_routes())
        .merge(protected_routes(&state));

    // 前缀为空时直接挂在根路径
    let base = state.config.api_base_uri.trim_end_matches('/');
    let router = if base.is_empty() {
        api
    } else {
        Router::new().nest(base, api)
    }
    .layer(axum::middleware::from_fn(log_errors));

    // 开发模式允许所有来源
    let router = if cfg!(debug_assertions) {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(CorsLayer::permissive())
    } else {
        router
    };

    router.with_state(state)
}
