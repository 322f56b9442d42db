use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    extract::CookieJar,
    headers::{Authorization, authorization::Bearer},
};
use uuid::Uuid;

use crate::{AppState, error::AuthError, services::ClientMeta};

/// 会话令牌 Cookie 名
pub const SESSION_COOKIE: &str = "session_token";

/// 通过认证的请求上下文，由中间件写入扩展
#[derive(Debug, Clone)]
pub struct CurrentSession {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub token: String,
}

/// 从请求头和连接信息中提取客户端信息
#[derive(Debug, Clone, Default)]
pub struct RequestMeta(pub ClientMeta);

fn client_ip(headers: &HeaderMap, remote: Option<String>) -> Option<String> {
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
        })
        .map(|ip| ip.trim().to_string())
        .or(remote)
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl<S: Send + Sync> FromRequestParts<S> for RequestMeta {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let remote = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string());

        Ok(RequestMeta(ClientMeta {
            user_agent: header_string(&parts.headers, "user-agent"),
            ip_address: client_ip(&parts.headers, remote),
            device_fingerprint: header_string(&parts.headers, "x-device-fingerprint"),
        }))
    }
}

/// 校验 Bearer 令牌或会话 Cookie，成功后注入 [`CurrentSession`]
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = bearer
        .map(|TypedHeader(Authorization(b))| b.token().to_string())
        .or_else(|| jar.get(SESSION_COOKIE).map(|c| c.value().to_string()))
        .ok_or(AuthError::Unauthorized)?;

    let found = state.auth.authenticate(&token).await?;

    req.extensions_mut().insert(CurrentSession {
        user_id: found.user.id,
        session_id: found.session.id,
        token,
    });
    Ok(next.run(req).await)
}
