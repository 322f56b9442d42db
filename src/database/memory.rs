//! 进程内的用户与会话存储。
//!
//! 与 Postgres 实现遵守相同的约定（邮箱唯一、级联删除、会话可用性判断），
//! 用于本地开发和测试。所有状态在一把锁内修改，插入时的唯一性检查是原子的。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::database::models::session::{
    CreatedSession, NewSession, SessionEntity, SessionPolicy, SessionState, SessionWithUser,
};
use crate::database::models::user::{NewUser, ProfileFields, UserEntity, normalize_email};
use crate::database::{SessionStore, UserStore};
use crate::error::StoreError;
use crate::utils::{Clock, generate_session_token, hash_session_token, token_preview};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserEntity>,
    sessions: HashMap<Uuid, SessionEntity>,
}

pub struct MemoryDatabase {
    tables: Mutex<Tables>,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
}

impl MemoryDatabase {
    pub fn new(clock: Arc<dyn Clock>, policy: SessionPolicy) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            clock,
            policy,
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 直接写入一条会话记录，绕过令牌生成
    pub fn insert_session_row(&self, session: SessionEntity) {
        self.tables().sessions.insert(session.id, session);
    }

    pub fn session_count(&self) -> usize {
        self.tables().sessions.len()
    }

    pub fn find_session(&self, session_id: Uuid) -> Option<SessionEntity> {
        self.tables().sessions.get(&session_id).cloned()
    }
}

fn find_session_by_token<'a>(
    tables: &'a mut Tables,
    token: &str,
) -> Option<&'a mut SessionEntity> {
    let hash = hash_session_token(token);
    tables.sessions.values_mut().find(|s| s.token_hash == hash)
}

fn extension_hours(hours: i64) -> Result<chrono::Duration, StoreError> {
    chrono::Duration::try_hours(hours)
        .filter(|_| hours > 0)
        .ok_or_else(|| StoreError::Other(format!("invalid session extension: {hours}h")))
}

#[async_trait]
impl UserStore for MemoryDatabase {
    async fn create(&self, new_user: NewUser) -> Result<UserEntity, StoreError> {
        let email = normalize_email(&new_user.email);
        let now = self.clock.now();
        let mut tables = self.tables();

        if tables.users.values().any(|u| u.email == email) {
            return Err(StoreError::DuplicateKey("uq_users_email".to_string()));
        }

        let user = UserEntity {
            id: Uuid::new_v4(),
            email,
            password_hash: new_user.password_hash,
            username: new_user.profile.username,
            display_name: new_user.profile.display_name,
            country: new_user.profile.country,
            is_active: true,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserEntity>, StoreError> {
        let email = normalize_email(email);
        Ok(self
            .tables()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserEntity>, StoreError> {
        Ok(self.tables().users.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserEntity>, StoreError> {
        let username = username.trim();
        Ok(self
            .tables()
            .users
            .values()
            .filter(|u| u.username.as_deref() == Some(username))
            .min_by_key(|u| u.created_at)
            .cloned())
    }

    async fn update_password(&self, id: Uuid, new_hash: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut tables = self.tables();
        let user = tables.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.password_hash = new_hash.to_string();
        user.updated_at = now;
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        fields: &ProfileFields,
    ) -> Result<UserEntity, StoreError> {
        let now = self.clock.now();
        let mut tables = self.tables();
        let user = tables.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(username) = &fields.username {
            user.username = Some(username.clone());
        }
        if let Some(display_name) = &fields.display_name {
            user.display_name = Some(display_name.clone());
        }
        if let Some(country) = &fields.country {
            user.country = Some(country.clone());
        }
        user.updated_at = now;
        Ok(user.clone())
    }

    async fn update_last_login(&self, id: Uuid) -> Result<(), StoreError> {
        let now = self.clock.now();
        if let Some(user) = self.tables().users.get_mut(&id) {
            user.last_login_at = Some(now);
        }
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut tables = self.tables();
        let user = tables.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.is_active = active;
        user.updated_at = now;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables();
        let removed = tables.users.remove(&id).is_some();
        if removed {
            tables.sessions.retain(|_, s| s.user_id != id);
        }
        Ok(removed)
    }
}

#[async_trait]
impl SessionStore for MemoryDatabase {
    async fn create(&self, new_session: NewSession) -> Result<CreatedSession, StoreError> {
        let token = generate_session_token();
        let now = self.clock.now();
        let mut tables = self.tables();

        // 与外键约束一致：用户必须存在
        if !tables.users.contains_key(&new_session.user_id) {
            return Err(StoreError::Other(format!(
                "sessions.user_id references missing user {}",
                new_session.user_id
            )));
        }

        let session = SessionEntity {
            id: Uuid::new_v4(),
            token_hash: hash_session_token(&token),
            user_id: new_session.user_id,
            user_agent: new_session.user_agent,
            ip_address: new_session.ip_address,
            device_fingerprint: new_session.device_fingerprint,
            remember_me: new_session.remember_me,
            created_at: now,
            last_activity_at: now,
            expires_at: now + self.policy.ttl_for(new_session.remember_me),
            is_active: true,
        };
        tables.sessions.insert(session.id, session.clone());

        tracing::debug!(
            session_id = %session.id,
            token = %token_preview(&token),
            "Created in-memory session"
        );
        Ok(CreatedSession { session, token })
    }

    async fn validate(&self, token: &str) -> Result<Option<SessionWithUser>, StoreError> {
        let now = self.clock.now();
        let mut tables = self.tables();

        let Some(session) = find_session_by_token(&mut tables, token) else {
            return Ok(None);
        };
        if session.state(now) != SessionState::Active {
            return Ok(None);
        }
        let user_id = session.user_id;
        let session_id = session.id;

        let user = match tables.users.get(&user_id) {
            Some(user) if user.is_active => user.clone(),
            _ => return Ok(None),
        };

        let Some(session) = tables.sessions.get_mut(&session_id) else {
            return Ok(None);
        };
        session.last_activity_at = now;

        Ok(Some(SessionWithUser {
            session: session.clone(),
            user,
        }))
    }

    async fn invalidate(&self, token: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables();
        match find_session_by_token(&mut tables, token) {
            Some(session) if session.is_active => {
                session.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn invalidate_by_id(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<bool, StoreError> {
        match self.tables().sessions.get_mut(&session_id) {
            Some(session) if session.user_id == user_id && session.is_active => {
                session.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn invalidate_all_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut count = 0;
        for session in self.tables().sessions.values_mut() {
            if session.user_id == user_id && session.is_active {
                session.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn list_active_for_user(&self, user_id: Uuid) -> Result<Vec<SessionEntity>, StoreError> {
        let now = self.clock.now();
        let mut sessions: Vec<SessionEntity> = self
            .tables()
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.state(now) == SessionState::Active)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(sessions)
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut tables = self.tables();
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| !s.is_sweepable(now));
        Ok((before - tables.sessions.len()) as u64)
    }

    async fn extend_expiry(&self, token: &str, hours: Option<i64>) -> Result<bool, StoreError> {
        let explicit = match hours {
            Some(h) => Some(extension_hours(h)?),
            None => None,
        };
        let now = self.clock.now();
        let policy = self.policy;
        let mut tables = self.tables();
        match find_session_by_token(&mut tables, token) {
            Some(session) if session.state(now) == SessionState::Active => {
                let ttl = explicit.unwrap_or_else(|| policy.ttl_for(session.remember_me));
                session.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use chrono::Duration;

    fn db() -> (Arc<ManualClock>, MemoryDatabase) {
        let clock = Arc::new(ManualClock::starting_now());
        let db = MemoryDatabase::new(clock.clone(), SessionPolicy::default());
        (clock, db)
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            profile: ProfileFields::default(),
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_case_insensitively() {
        let (_, db) = db();
        UserStore::create(&db, new_user("Fan@Bricks.com")).await.unwrap();
        let err = UserStore::create(&db, new_user("fan@bricks.COM")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn lookups_by_email_and_username() {
        let (_, db) = db();
        let mut input = new_user("Fan@Bricks.com");
        input.profile.username = Some("brickfan".into());
        let user = UserStore::create(&db, input).await.unwrap();

        let by_email = db.find_by_email(" fan@bricks.com ").await.unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        let by_name = db.find_by_username("brickfan").await.unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
        assert!(db.find_by_username("nobody").await.unwrap().is_none());
        assert!(db.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_profile_keeps_unset_fields() {
        let (_, db) = db();
        let mut input = new_user("a@b.c");
        input.profile.country = Some("DK".into());
        let user = UserStore::create(&db, input).await.unwrap();

        let updated = db
            .update_profile(
                user.id,
                &ProfileFields {
                    username: Some("brickfan".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.username.as_deref(), Some("brickfan"));
        assert_eq!(updated.country.as_deref(), Some("DK"));

        let missing = db.update_profile(Uuid::new_v4(), &ProfileFields::default()).await;
        assert!(matches!(missing, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn extend_expiry_without_hours_reapplies_policy() {
        let (clock, db) = db();
        let user = UserStore::create(&db, new_user("a@b.c")).await.unwrap();
        let created = SessionStore::create(
            &db,
            NewSession {
                user_id: user.id,
                remember_me: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        clock.advance(Duration::hours(5));
        assert!(db.extend_expiry(&created.token, None).await.unwrap());
        let session = db.find_session(created.session.id).unwrap();
        assert_eq!(session.expires_at, clock.now() + Duration::hours(720));

        assert!(db.extend_expiry(&created.token, Some(2)).await.unwrap());
        let session = db.find_session(created.session.id).unwrap();
        assert_eq!(session.expires_at, clock.now() + Duration::hours(2));

        for bad in [0, -5, i64::MAX] {
            assert!(matches!(
                db.extend_expiry(&created.token, Some(bad)).await,
                Err(StoreError::Other(_))
            ));
        }
        let session = db.find_session(created.session.id).unwrap();
        assert_eq!(session.expires_at, clock.now() + Duration::hours(2));
    }

    #[tokio::test]
    async fn deleting_user_cascades_to_sessions() {
        let (_, db) = db();
        let user = UserStore::create(&db, new_user("a@b.c")).await.unwrap();
        SessionStore::create(
            &db,
            NewSession {
                user_id: user.id,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(db.session_count(), 1);
        assert!(UserStore::delete(&db, user.id).await.unwrap());
        assert_eq!(db.session_count(), 0);
    }
}
