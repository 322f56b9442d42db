mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use brickvault::{
    cache::ResetTokenCache,
    database::{MemoryDatabase, NewUser, ProfileFields, SessionStore, UserEntity, UserStore},
    error::{AuthError, StoreError},
    services::{LoginInput, ProfileUpdateInput, RegisterInput},
    utils::{Clock, ManualClock},
};
use common::{Harness, PASSWORD, device};

fn login_input(email: &str, password: &str, remember_me: bool) -> LoginInput {
    LoginInput {
        email: email.into(),
        password: password.into(),
        remember_me,
    }
}

#[tokio::test]
async fn concurrent_registration_yields_one_account() {
    let h = Harness::new();
    let input = RegisterInput {
        email: "fan@example.com".into(),
        password: PASSWORD.into(),
        ..Default::default()
    };

    let (a, b) = tokio::join!(
        h.auth.register(input.clone(), device("laptop")),
        h.auth.register(input, device("phone")),
    );

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(matches!(a, Err(AuthError::DuplicateKey)) || matches!(b, Err(AuthError::DuplicateKey)));
}

#[tokio::test]
async fn duplicate_email_ignores_case() {
    let h = Harness::new();
    h.register("fan@example.com").await;

    let result = h
        .auth
        .register(
            RegisterInput {
                email: "Fan@Example.COM".into(),
                password: PASSWORD.into(),
                ..Default::default()
            },
            device("phone"),
        )
        .await;
    assert_matches!(result, Err(AuthError::DuplicateKey));
}

#[tokio::test]
async fn surrounding_whitespace_in_email_is_ignored() {
    let h = Harness::new();
    let outcome = h
        .auth
        .register(
            RegisterInput {
                email: " fan@bricks.com ".into(),
                password: PASSWORD.into(),
                ..Default::default()
            },
            device("laptop"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.user.email, "fan@bricks.com");

    h.auth
        .login(login_input("\tfan@bricks.com ", PASSWORD, false), device("phone"))
        .await
        .unwrap();
    h.auth.forgot_password(" fan@bricks.com").await.unwrap();
    h.notifier.wait_for_token("fan@bricks.com").await;
}

#[tokio::test]
async fn register_never_stores_plaintext_password() {
    let h = Harness::new();
    let outcome = h.register("fan@example.com").await;

    let user = UserStore::find_by_id(h.db.as_ref(), outcome.user.id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(user.password_hash, PASSWORD);
    assert!(user.password_hash.starts_with("$2"));
}

#[tokio::test]
async fn session_lifetime_follows_remember_me() {
    let h = Harness::new();
    let registered = h.register("fan@example.com").await;
    let short = h.db.find_session(registered.session.session_id).unwrap();
    assert_eq!(short.expires_at - short.created_at, Duration::hours(24));

    let remembered = h
        .auth
        .login(login_input("fan@example.com", PASSWORD, true), device("tablet"))
        .await
        .unwrap();
    let long = h.db.find_session(remembered.session.session_id).unwrap();
    assert_eq!(long.expires_at - long.created_at, Duration::hours(720));
    assert!(remembered.session.remember_me);
    assert!(remembered.user.last_login_at.is_some());
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let h = Harness::new();
    h.register("fan@example.com").await;

    let unknown = h
        .auth
        .login(login_input("ghost@example.com", PASSWORD, false), device("laptop"))
        .await
        .unwrap_err();
    let wrong = h
        .auth
        .login(login_input("fan@example.com", "Wrong1234", false), device("laptop"))
        .await
        .unwrap_err();

    assert_matches!(unknown, AuthError::InvalidCredentials);
    assert_matches!(wrong, AuthError::InvalidCredentials);
    assert_eq!(unknown.to_string(), wrong.to_string());
    assert_eq!(unknown.status(), wrong.status());
}

#[tokio::test]
async fn validate_rejects_every_unusable_session() {
    let h = Harness::new();
    let sessions: &dyn SessionStore = h.db.as_ref();

    // 从未签发
    assert!(sessions.validate("never-issued").await.unwrap().is_none());

    // 已注销
    let a = h.register("a@example.com").await;
    assert!(sessions.validate(&a.session.token).await.unwrap().is_some());
    h.auth.logout(&a.session.token).await.unwrap();
    assert!(sessions.validate(&a.session.token).await.unwrap().is_none());

    // 已过期
    let b = h.register("b@example.com").await;
    h.clock.advance(Duration::hours(24) + Duration::seconds(1));
    assert!(sessions.validate(&b.session.token).await.unwrap().is_none());

    // 用户已停用
    let c = h.register("c@example.com").await;
    UserStore::set_active(h.db.as_ref(), c.user.id, false)
        .await
        .unwrap();
    assert!(sessions.validate(&c.session.token).await.unwrap().is_none());
    assert_matches!(
        h.auth.authenticate(&c.session.token).await,
        Err(AuthError::Unauthorized)
    );

    let d = h.register("d@example.com").await;
    let found = h.auth.authenticate(&d.session.token).await.unwrap();
    assert_eq!(found.user.id, d.user.id);
    assert_eq!(found.session.id, d.session.session_id);
}

#[tokio::test]
async fn logout_is_idempotent() {
    let h = Harness::new();
    let outcome = h.register("fan@example.com").await;

    assert!(h.auth.logout(&outcome.session.token).await.unwrap());
    assert!(!h.auth.logout(&outcome.session.token).await.unwrap());
}

#[tokio::test]
async fn reset_password_round_trip() {
    let h = Harness::new();
    h.register("fan@example.com").await;

    let outcome = h.auth.forgot_password("fan@example.com").await.unwrap();
    assert!(outcome.success);
    let token = h.notifier.wait_for_token("fan@example.com").await;

    let reset = h.auth.reset_password(&token, "NewPass1!").await.unwrap();
    assert!(reset.success);

    h.auth
        .login(login_input("fan@example.com", "NewPass1!", false), device("laptop"))
        .await
        .unwrap();
    assert_matches!(
        h.auth
            .login(login_input("fan@example.com", PASSWORD, false), device("laptop"))
            .await,
        Err(AuthError::InvalidCredentials)
    );
}

#[tokio::test]
async fn reset_token_cannot_be_replayed() {
    let h = Harness::new();
    h.register("fan@example.com").await;
    h.auth.forgot_password("fan@example.com").await.unwrap();
    let token = h.notifier.wait_for_token("fan@example.com").await;

    h.auth.reset_password(&token, "NewPass1!").await.unwrap();
    assert_matches!(
        h.auth.reset_password(&token, "Another22").await,
        Err(AuthError::TokenAlreadyUsed)
    );

    // 已使用的记录只保留较短时间
    let ttl = h.cache.ttl_of(&token).unwrap();
    assert!(ttl <= 300);
}

#[tokio::test]
async fn reset_token_checks_run_in_order() {
    let h = Harness::new();
    let user = h.register("fan@example.com").await;
    h.auth.forgot_password("fan@example.com").await.unwrap();
    let token = h.notifier.wait_for_token("fan@example.com").await;

    // 新密码不合规时令牌不会被消耗
    assert_matches!(
        h.auth.reset_password(&token, "short").await,
        Err(AuthError::Validation(_))
    );
    assert!(!h.cache.get(&token).await.unwrap().unwrap().used);

    assert_matches!(
        h.auth.reset_password("not.a.token", "NewPass1!").await,
        Err(AuthError::InvalidToken)
    );

    // 缓存记录缺失时按已使用处理
    h.cache.delete(&token).await.unwrap();
    assert_matches!(
        h.auth.reset_password(&token, "NewPass1!").await,
        Err(AuthError::TokenAlreadyUsed)
    );

    // 用户已删除
    h.auth.forgot_password("fan@example.com").await.unwrap();
    let second = h.notifier.wait_for_token("fan@example.com").await;
    assert_ne!(second, token);
    UserStore::delete(h.db.as_ref(), user.user.id).await.unwrap();
    assert_matches!(
        h.auth.reset_password(&second, "NewPass1!").await,
        Err(AuthError::NotFound("user"))
    );
}

#[tokio::test]
async fn reset_token_expires_after_an_hour() {
    let h = Harness::new();
    h.register("fan@example.com").await;
    h.auth.forgot_password("fan@example.com").await.unwrap();
    let token = h.notifier.wait_for_token("fan@example.com").await;

    h.clock.advance(Duration::seconds(3601));
    assert_matches!(
        h.auth.reset_password(&token, "NewPass1!").await,
        Err(AuthError::TokenExpired)
    );
}

#[tokio::test]
async fn forgot_password_response_hides_account_existence() {
    let h = Harness::new();
    h.register("real@example.com").await;

    let unknown = h.auth.forgot_password("nonexistent@example.com").await.unwrap();
    let known = h.auth.forgot_password("real@example.com").await.unwrap();

    assert_eq!(unknown, known);
    assert_eq!(
        serde_json::to_value(&unknown).unwrap(),
        serde_json::to_value(&known).unwrap()
    );

    h.notifier.wait_for_token("real@example.com").await;
    assert!(
        h.notifier
            .sent()
            .iter()
            .all(|(to, _)| to != "nonexistent@example.com")
    );
}

#[tokio::test]
async fn forgot_password_still_rejects_malformed_email() {
    let h = Harness::new();
    assert_matches!(
        h.auth.forgot_password("not-an-email").await,
        Err(AuthError::Validation(_))
    );
}

#[tokio::test]
async fn session_enumeration_and_selective_revoke() {
    let h = Harness::new();
    let user = h.register("fan@example.com").await;
    h.auth.logout(&user.session.token).await.unwrap();

    let mut issued = Vec::new();
    for name in ["laptop", "phone", "tablet"] {
        h.clock.advance(Duration::minutes(1));
        let outcome = h
            .auth
            .login(login_input("fan@example.com", PASSWORD, false), device(name))
            .await
            .unwrap();
        issued.push(outcome.session);
    }

    let listed = h
        .auth
        .list_sessions(user.user.id, Some(issued[2].session_id))
        .await
        .unwrap();
    let ids: Vec<Uuid> = listed.iter().map(|s| s.id).collect();
    assert_eq!(
        ids,
        vec![issued[2].session_id, issued[1].session_id, issued[0].session_id]
    );
    assert!(listed[0].current);
    assert_eq!(listed[0].device_fingerprint.as_deref(), Some("tablet"));

    h.auth
        .revoke_session(user.user.id, issued[1].session_id)
        .await
        .unwrap();
    let listed = h.auth.list_sessions(user.user.id, None).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|s| s.id != issued[1].session_id));
}

#[tokio::test]
async fn cannot_revoke_another_users_session() {
    let h = Harness::new();
    let owner = h.register("owner@example.com").await;
    let other = h.register("other@example.com").await;

    assert_matches!(
        h.auth
            .revoke_session(other.user.id, owner.session.session_id)
            .await,
        Err(AuthError::NotFound("session"))
    );
    assert!(h.auth.authenticate(&owner.session.token).await.is_ok());
}

#[tokio::test]
async fn password_reset_invalidates_existing_sessions() {
    let h = Harness::new();
    let first = h.register("fan@example.com").await;
    let second = h
        .auth
        .login(login_input("fan@example.com", PASSWORD, true), device("phone"))
        .await
        .unwrap();

    h.auth.forgot_password("fan@example.com").await.unwrap();
    let token = h.notifier.wait_for_token("fan@example.com").await;
    h.auth.reset_password(&token, "NewPass1!").await.unwrap();

    for token in [&first.session.token, &second.session.token] {
        assert_matches!(h.auth.authenticate(token).await, Err(AuthError::Unauthorized));
    }
    assert!(
        h.auth
            .list_sessions(first.user.id, None)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn change_password_requires_current_password() {
    let h = Harness::new();
    let user = h.register("fan@example.com").await;

    assert_matches!(
        h.auth
            .change_password(user.user.id, "Wrong1234", "NewPass1!")
            .await,
        Err(AuthError::InvalidCredentials)
    );

    let invalidated = h
        .auth
        .change_password(user.user.id, PASSWORD, "NewPass1!")
        .await
        .unwrap();
    assert_eq!(invalidated, 1);
    assert_matches!(
        h.auth.authenticate(&user.session.token).await,
        Err(AuthError::Unauthorized)
    );
}

#[tokio::test]
async fn profile_update_keeps_omitted_fields() {
    let h = Harness::new();
    let user = h.register("fan@example.com").await;

    let updated = h
        .auth
        .update_profile(
            user.user.id,
            ProfileUpdateInput {
                country: Some(" Denmark ".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.country.as_deref(), Some("Denmark"));
    assert_eq!(updated.username.as_deref(), Some("brickfan"));

    assert_eq!(h.auth.get_profile(user.user.id).await.unwrap(), updated);
    assert_matches!(
        h.auth.get_profile(Uuid::new_v4()).await,
        Err(AuthError::NotFound("user"))
    );
}

#[tokio::test]
async fn deactivated_user_cannot_log_in() {
    let h = Harness::new();
    let user = h.register("fan@example.com").await;

    assert_eq!(h.auth.deactivate_user(user.user.id).await.unwrap(), 1);
    assert_matches!(
        h.auth
            .login(login_input("fan@example.com", PASSWORD, false), device("laptop"))
            .await,
        Err(AuthError::InvalidCredentials)
    );

    // 停用账户不会收到重置邮件
    h.auth.forgot_password("fan@example.com").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn extend_session_reapplies_policy() {
    let h = Harness::new();
    let user = h.register("fan@example.com").await;

    h.clock.advance(Duration::hours(23));
    assert!(h.auth.extend_session(&user.session.token, None).await.unwrap());
    let session = h.db.find_session(user.session.session_id).unwrap();
    assert_eq!(session.expires_at, h.clock.now() + Duration::hours(24));

    assert!(h.auth.extend_session(&user.session.token, Some(2)).await.unwrap());
    let session = h.db.find_session(user.session.session_id).unwrap();
    assert_eq!(session.expires_at, h.clock.now() + Duration::hours(2));

    h.auth.logout(&user.session.token).await.unwrap();
    assert!(!h.auth.extend_session(&user.session.token, None).await.unwrap());
}

#[tokio::test]
async fn extend_session_rejects_out_of_range_hours() {
    let h = Harness::new();
    let user = h.register("fan@example.com").await;
    let before = h.db.find_session(user.session.session_id).unwrap().expires_at;

    for hours in [i64::MAX, i64::MIN, -5, 0, 721] {
        assert_matches!(
            h.auth.extend_session(&user.session.token, Some(hours)).await,
            Err(AuthError::Validation(_))
        );
    }

    let session = h.db.find_session(user.session.session_id).unwrap();
    assert_eq!(session.expires_at, before);
    assert!(h.auth.authenticate(&user.session.token).await.is_ok());

    assert!(h.auth.extend_session(&user.session.token, Some(720)).await.unwrap());
}

/// 可按需注入故障的用户存储
struct FlakyUsers {
    inner: Arc<MemoryDatabase>,
    fail_last_login: bool,
    time_out_lookups: bool,
}

#[async_trait]
impl UserStore for FlakyUsers {
    async fn create(&self, new_user: NewUser) -> Result<UserEntity, StoreError> {
        UserStore::create(self.inner.as_ref(), new_user).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserEntity>, StoreError> {
        if self.time_out_lookups {
            return Err(StoreError::Timeout);
        }
        self.inner.find_by_email(email).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserEntity>, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserEntity>, StoreError> {
        self.inner.find_by_username(username).await
    }

    async fn update_password(&self, id: Uuid, new_hash: &str) -> Result<(), StoreError> {
        self.inner.update_password(id, new_hash).await
    }

    async fn update_profile(
        &self,
        id: Uuid,
        fields: &ProfileFields,
    ) -> Result<UserEntity, StoreError> {
        self.inner.update_profile(id, fields).await
    }

    async fn update_last_login(&self, id: Uuid) -> Result<(), StoreError> {
        if self.fail_last_login {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.update_last_login(id).await
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError> {
        self.inner.set_active(id, active).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        UserStore::delete(self.inner.as_ref(), id).await
    }
}

fn flaky_harness(fail_last_login: bool, time_out_lookups: bool) -> Harness {
    let clock = Arc::new(ManualClock::starting_now());
    let db = Arc::new(MemoryDatabase::new(clock.clone(), Default::default()));
    let users = Arc::new(FlakyUsers {
        inner: db.clone(),
        fail_last_login,
        time_out_lookups,
    });
    Harness::build(clock, db.clone(), users, db)
}

#[tokio::test]
async fn last_login_failure_does_not_block_login() {
    let h = flaky_harness(true, false);
    h.register("fan@example.com").await;

    let outcome = h
        .auth
        .login(login_input("fan@example.com", PASSWORD, false), device("laptop"))
        .await
        .unwrap();
    assert!(h.auth.authenticate(&outcome.session.token).await.is_ok());

    let stored = UserStore::find_by_id(h.db.as_ref(), outcome.user.id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.last_login_at.is_none());
}

#[tokio::test]
async fn store_timeout_surfaces_as_unavailable() {
    let h = flaky_harness(false, true);
    h.register("fan@example.com").await;

    let err = h
        .auth
        .login(login_input("fan@example.com", PASSWORD, false), device("laptop"))
        .await
        .unwrap_err();
    assert_matches!(err, AuthError::Timeout);
    assert_eq!(err.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);

    assert_matches!(
        h.auth.forgot_password("fan@example.com").await,
        Err(AuthError::Timeout)
    );
}
