//! 认证服务：注册、登录、登出、找回与重置密码、资料与会话管理。
//!
//! HTTP 层只调用这里的方法。凭据、会话和重置令牌分别由
//! [`UserStore`]、[`SessionStore`]、[`ResetTokenCache`] 负责，
//! 三者之间没有事务耦合。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::cache::{CachedResetToken, ResetTokenCache};
use crate::config::AuthSettings;
use crate::database::{
    NewSession, NewUser, ProfileFields, SessionEntity, SessionStore, SessionWithUser, UserEntity,
    UserStore,
};
use crate::error::{AuthError, AuthResult, StoreError};
use crate::services::email::EmailNotifier;
use crate::utils::{
    Clock, ResetTokenError, best_effort, hash_password, hash_password_blocking,
    sign_reset_token, spawn_best_effort, token_preview, verify_password_blocking,
    verify_reset_token,
};

/// 找回密码的统一响应文案，无论邮箱是否存在
pub const FORGOT_PASSWORD_MESSAGE: &str = "如果该邮箱已注册，我们已发送重置密码邮件";
pub const RESET_PASSWORD_MESSAGE: &str = "密码已重置，请使用新密码登录";

/// 密码必须同时包含字母和数字
fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if has_letter && has_digit {
        Ok(())
    } else {
        let mut err = ValidationError::new("password_strength");
        err.message = Some("must contain at least one letter and one digit".into());
        Err(err)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RegisterInput {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(
        length(min = 8, max = 128, message = "must be 8-128 characters"),
        custom(function = "validate_password_strength")
    )]
    pub password: String,
    #[validate(length(min = 2, max = 32, message = "must be 2-32 characters"))]
    pub username: Option<String>,
    #[validate(length(max = 64, message = "must be at most 64 characters"))]
    pub display_name: Option<String>,
    #[validate(length(max = 56, message = "must be at most 56 characters"))]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct LoginInput {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, max = 128, message = "must not be empty"))]
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ProfileUpdateInput {
    #[validate(length(min = 2, max = 32, message = "must be 2-32 characters"))]
    pub username: Option<String>,
    #[validate(length(max = 64, message = "must be at most 64 characters"))]
    pub display_name: Option<String>,
    #[validate(length(max = 56, message = "must be at most 56 characters"))]
    pub country: Option<String>,
}

#[derive(Debug, Validate)]
struct NewPassword {
    #[validate(
        length(min = 8, max = 128, message = "must be 8-128 characters"),
        custom(function = "validate_password_strength")
    )]
    password: String,
}

#[derive(Debug, Validate)]
struct EmailOnly {
    #[validate(email(message = "must be a valid email address"))]
    email: String,
}

fn validate_new_password(password: &str) -> AuthResult<()> {
    NewPassword {
        password: password.to_string(),
    }
    .validate()?;
    Ok(())
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// 请求来源信息
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub device_fingerprint: Option<String>,
}

/// 对外展示的用户资料
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProfileView {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub country: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<UserEntity> for ProfileView {
    fn from(user: UserEntity) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            display_name: user.display_name,
            country: user.country,
            created_at: user.created_at,
            last_login_at: user.last_login_at,
        }
    }
}

/// 新签发的会话
#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    pub session_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub remember_me: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthOutcome {
    pub user: ProfileView,
    pub session: IssuedSession,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
}

impl ActionOutcome {
    fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub device_fingerprint: Option<String>,
    pub remember_me: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub current: bool,
}

impl SessionView {
    fn from_entity(session: SessionEntity, current: Option<Uuid>) -> Self {
        Self {
            current: current == Some(session.id),
            id: session.id,
            user_agent: session.user_agent,
            ip_address: session.ip_address,
            device_fingerprint: session.device_fingerprint,
            remember_me: session.remember_me,
            created_at: session.created_at,
            last_activity_at: session.last_activity_at,
            expires_at: session.expires_at,
        }
    }
}

pub struct AuthService {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    reset_tokens: Arc<dyn ResetTokenCache>,
    notifier: Arc<dyn EmailNotifier>,
    clock: Arc<dyn Clock>,
    settings: AuthSettings,
    /// 用于未知邮箱时消耗与真实校验相当的时间
    dummy_hash: String,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        reset_tokens: Arc<dyn ResetTokenCache>,
        notifier: Arc<dyn EmailNotifier>,
        clock: Arc<dyn Clock>,
        settings: AuthSettings,
    ) -> AuthResult<Self> {
        if settings.jwt_secret.is_empty() {
            return Err(AuthError::Internal("token signing secret is empty".into()));
        }
        let dummy_hash = hash_password(&Uuid::new_v4().to_string(), settings.bcrypt_cost)?;
        Ok(Self {
            users,
            sessions,
            reset_tokens,
            notifier,
            clock,
            settings,
            dummy_hash,
        })
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    async fn issue_session(
        &self,
        user_id: Uuid,
        remember_me: bool,
        meta: ClientMeta,
    ) -> AuthResult<IssuedSession> {
        let created = self
            .sessions
            .create(NewSession {
                user_id,
                user_agent: meta.user_agent,
                ip_address: meta.ip_address,
                device_fingerprint: meta.device_fingerprint,
                remember_me,
            })
            .await?;

        Ok(IssuedSession {
            session_id: created.session.id,
            token: created.token,
            expires_at: created.session.expires_at,
            remember_me: created.session.remember_me,
        })
    }

    /// 消耗一次 bcrypt 校验的时间，结果丢弃
    async fn burn_hash_time(&self) {
        let _ = verify_password_blocking(Uuid::new_v4().to_string(), self.dummy_hash.clone()).await;
    }

    pub async fn register(
        &self,
        mut input: RegisterInput,
        meta: ClientMeta,
    ) -> AuthResult<AuthOutcome> {
        input.email = input.email.trim().to_string();
        input.validate()?;

        let password_hash =
            hash_password_blocking(input.password, self.settings.bcrypt_cost).await?;

        // 不做存在性预检查，唯一约束保证并发注册只有一个成功
        let user = self
            .users
            .create(NewUser {
                email: input.email,
                password_hash,
                profile: ProfileFields {
                    username: trimmed(input.username),
                    display_name: trimmed(input.display_name),
                    country: trimmed(input.country),
                },
            })
            .await
            .map_err(|e| match e {
                StoreError::DuplicateKey(_) => AuthError::DuplicateKey,
                other => other.into(),
            })?;

        let session = self.issue_session(user.id, false, meta).await?;
        tracing::info!(user_id = %user.id, "User registered");

        Ok(AuthOutcome {
            user: user.into(),
            session,
        })
    }

    pub async fn login(&self, mut input: LoginInput, meta: ClientMeta) -> AuthResult<AuthOutcome> {
        input.email = input.email.trim().to_string();
        input.validate()?;

        let Some(user) = self.users.find_by_email(&input.email).await? else {
            self.burn_hash_time().await;
            tracing::info!("Login rejected: unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        let password_ok =
            verify_password_blocking(input.password, user.password_hash.clone()).await?;
        if !password_ok {
            tracing::info!(user_id = %user.id, "Login rejected: wrong password");
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active {
            tracing::info!(user_id = %user.id, "Login rejected: account inactive");
            return Err(AuthError::InvalidCredentials);
        }

        best_effort("update last login", self.users.update_last_login(user.id)).await;

        let session = self.issue_session(user.id, input.remember_me, meta).await?;
        tracing::info!(user_id = %user.id, remember_me = input.remember_me, "User logged in");

        let mut view = ProfileView::from(user);
        view.last_login_at = Some(self.clock.now());
        Ok(AuthOutcome {
            user: view,
            session,
        })
    }

    /// 校验会话令牌，不可用时返回 [`AuthError::Unauthorized`]
    pub async fn authenticate(&self, token: &str) -> AuthResult<SessionWithUser> {
        match self.sessions.validate(token).await? {
            Some(found) => Ok(found),
            None => {
                tracing::debug!(token = %token_preview(token), "Rejected session token");
                Err(AuthError::Unauthorized)
            }
        }
    }

    pub async fn logout(&self, token: &str) -> AuthResult<bool> {
        let invalidated = self.sessions.invalidate(token).await?;
        tracing::info!(token = %token_preview(token), invalidated, "Logout");
        Ok(invalidated)
    }

    pub async fn logout_all(&self, user_id: Uuid) -> AuthResult<u64> {
        Ok(self.sessions.invalidate_all_for_user(user_id).await?)
    }

    /// 延长会话有效期。小时数须在 1 到记住我时长之间，存储失败不影响调用方
    pub async fn extend_session(&self, token: &str, hours: Option<i64>) -> AuthResult<bool> {
        let max_hours = self.settings.remember_me_ttl_hours;
        if let Some(h) = hours {
            if !(1..=max_hours).contains(&h) {
                return Err(AuthError::Validation(format!(
                    "hours: must be between 1 and {max_hours}"
                )));
            }
        }

        Ok(
            best_effort("extend session expiry", self.sessions.extend_expiry(token, hours))
                .await
                .unwrap_or(false),
        )
    }

    /// 无论邮箱是否存在都返回相同结果
    pub async fn forgot_password(&self, email: &str) -> AuthResult<ActionOutcome> {
        let email = email.trim();
        EmailOnly {
            email: email.to_string(),
        }
        .validate()?;

        let user = self.users.find_by_email(email).await?;

        // 两条路径都做一次哈希校验，保持耗时接近
        self.burn_hash_time().await;

        match user {
            Some(user) if user.is_active => self.start_password_reset(&user).await,
            Some(user) => {
                tracing::info!(user_id = %user.id, "Password reset skipped: account inactive");
            }
            None => tracing::debug!("Password reset requested for unknown email"),
        }

        Ok(ActionOutcome::ok(FORGOT_PASSWORD_MESSAGE))
    }

    async fn start_password_reset(&self, user: &UserEntity) {
        let now = self.clock.now();
        let ttl = Duration::seconds(self.settings.reset_token_ttl_secs as i64);

        let token = match sign_reset_token(user.id, &user.email, now, ttl, &self.settings.jwt_secret) {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(user_id = %user.id, error = %e, "Failed to sign reset token");
                return;
            }
        };

        let entry = CachedResetToken::new(user.id, &user.email, now.timestamp());
        let cached = best_effort(
            "cache reset token",
            self.reset_tokens
                .store(&token, &entry, self.settings.reset_token_ttl_secs),
        )
        .await;
        if cached.is_none() {
            // 缓存写入失败时令牌无法兑现，不再发送邮件
            return;
        }

        let notifier = Arc::clone(&self.notifier);
        let to = user.email.clone();
        spawn_best_effort("send password reset email", async move {
            notifier.send_password_reset(&to, &token).await
        });
        tracing::info!(user_id = %user.id, "Password reset token issued");
    }

    /// 依次检查：新密码格式、令牌签名/类型/过期、缓存中的使用状态
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<ActionOutcome> {
        validate_new_password(new_password)?;

        let claims = verify_reset_token(token, &self.settings.jwt_secret, self.clock.now())
            .map_err(|e| {
                tracing::info!(token = %token_preview(token), reason = %e, "Reset token rejected");
                match e {
                    ResetTokenError::Expired => AuthError::TokenExpired,
                    ResetTokenError::InvalidSignature | ResetTokenError::WrongType => {
                        AuthError::InvalidToken
                    }
                }
            })?;

        match self.reset_tokens.get(token).await? {
            Some(entry) if entry.user_id != claims.sub => {
                tracing::warn!(token = %token_preview(token), "Reset token subject mismatch");
                return Err(AuthError::InvalidToken);
            }
            Some(entry) if !entry.used => {}
            _ => {
                tracing::info!(token = %token_preview(token), "Reset token already used or evicted");
                return Err(AuthError::TokenAlreadyUsed);
            }
        }

        let user = self
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or(AuthError::NotFound("user"))?;

        let password_hash =
            hash_password_blocking(new_password.to_string(), self.settings.bcrypt_cost).await?;
        self.users
            .update_password(user.id, &password_hash)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AuthError::NotFound("user"),
                other => other.into(),
            })?;

        best_effort(
            "mark reset token used",
            self.reset_tokens
                .mark_used(token, self.settings.reset_token_used_ttl_secs),
        )
        .await;

        // 重置后旧会话全部失效
        let invalidated = self.sessions.invalidate_all_for_user(user.id).await?;
        tracing::info!(user_id = %user.id, invalidated, "Password reset completed");

        Ok(ActionOutcome::ok(RESET_PASSWORD_MESSAGE))
    }

    /// 已登录用户修改密码，成功后所有会话失效
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<u64> {
        validate_new_password(new_password)?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::NotFound("user"))?;

        let current_ok =
            verify_password_blocking(current_password.to_string(), user.password_hash.clone())
                .await?;
        if !current_ok {
            return Err(AuthError::InvalidCredentials);
        }

        let password_hash =
            hash_password_blocking(new_password.to_string(), self.settings.bcrypt_cost).await?;
        self.users.update_password(user.id, &password_hash).await?;

        let invalidated = self.sessions.invalidate_all_for_user(user.id).await?;
        tracing::info!(user_id = %user.id, invalidated, "Password changed");
        Ok(invalidated)
    }

    pub async fn get_profile(&self, user_id: Uuid) -> AuthResult<ProfileView> {
        self.users
            .find_by_id(user_id)
            .await?
            .map(ProfileView::from)
            .ok_or(AuthError::NotFound("user"))
    }

    pub async fn update_profile(
        &self,
        user_id: Uuid,
        input: ProfileUpdateInput,
    ) -> AuthResult<ProfileView> {
        input.validate()?;
        let fields = ProfileFields {
            username: trimmed(input.username),
            display_name: trimmed(input.display_name),
            country: trimmed(input.country),
        };

        let user = self
            .users
            .update_profile(user_id, &fields)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AuthError::NotFound("user"),
                other => other.into(),
            })?;
        Ok(user.into())
    }

    pub async fn list_sessions(
        &self,
        user_id: Uuid,
        current_session: Option<Uuid>,
    ) -> AuthResult<Vec<SessionView>> {
        let sessions = self.sessions.list_active_for_user(user_id).await?;
        Ok(sessions
            .into_iter()
            .map(|s| SessionView::from_entity(s, current_session))
            .collect())
    }

    /// 只允许撤销自己的会话
    pub async fn revoke_session(&self, user_id: Uuid, session_id: Uuid) -> AuthResult<()> {
        if self.sessions.invalidate_by_id(user_id, session_id).await? {
            tracing::info!(user_id = %user_id, session_id = %session_id, "Session revoked");
            Ok(())
        } else {
            Err(AuthError::NotFound("session"))
        }
    }

    /// 软停用账户并使其所有会话失效
    pub async fn deactivate_user(&self, user_id: Uuid) -> AuthResult<u64> {
        self.users
            .set_active(user_id, false)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AuthError::NotFound("user"),
                other => other.into(),
            })?;
        let invalidated = self.sessions.invalidate_all_for_user(user_id).await?;
        tracing::info!(user_id = %user_id, invalidated, "User deactivated");
        Ok(invalidated)
    }
}
