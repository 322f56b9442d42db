// 会话存储库
// 会话的 Postgres 实现，库中只保存令牌摘要

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::database::SessionStore;
use crate::database::models::session::{
    CreatedSession, NewSession, SessionEntity, SessionPolicy, SessionWithUser,
};
use crate::database::models::user::UserEntity;
use crate::error::{StoreError, classify_sqlx_error};
use crate::utils::{
    Clock, generate_session_token, hash_session_token, spawn_best_effort, token_preview,
    with_timeout,
};

const SESSION_COLUMNS: &str = "id, token_hash, user_id, user_agent, ip_address, \
                               device_fingerprint, remember_me, created_at, last_activity_at, \
                               expires_at, is_active";

/// 单次清理删除的最大行数
const CLEANUP_BATCH_SIZE: i64 = 1000;

/// 会话与用户的联表行
#[derive(Debug, FromRow)]
struct SessionUserRow {
    #[sqlx(flatten)]
    session: SessionEntity,
    u_email: String,
    u_password_hash: String,
    u_username: Option<String>,
    u_display_name: Option<String>,
    u_country: Option<String>,
    u_is_active: bool,
    u_created_at: DateTime<Utc>,
    u_updated_at: DateTime<Utc>,
    u_last_login_at: Option<DateTime<Utc>>,
}

impl From<SessionUserRow> for SessionWithUser {
    fn from(row: SessionUserRow) -> Self {
        let user = UserEntity {
            id: row.session.user_id,
            email: row.u_email,
            password_hash: row.u_password_hash,
            username: row.u_username,
            display_name: row.u_display_name,
            country: row.u_country,
            is_active: row.u_is_active,
            created_at: row.u_created_at,
            updated_at: row.u_updated_at,
            last_login_at: row.u_last_login_at,
        };
        SessionWithUser {
            session: row.session,
            user,
        }
    }
}

/// 会话存储库
pub struct SessionRepository {
    db: Arc<PgPool>,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
    timeout: Duration,
}

impl SessionRepository {
    pub fn new(
        db: Arc<PgPool>,
        clock: Arc<dyn Clock>,
        policy: SessionPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            db,
            clock,
            policy,
            timeout,
        }
    }
}

/// 策略时长已被限制在十年内，不会超出 i32
fn policy_hours(ttl: chrono::Duration) -> i32 {
    i32::try_from(ttl.num_hours()).unwrap_or(i32::MAX)
}

async fn refresh_activity(
    db: &PgPool,
    session_id: Uuid,
    now: DateTime<Utc>,
    timeout: Duration,
) -> Result<(), StoreError> {
    with_timeout(timeout, async {
        sqlx::query("UPDATE sessions SET last_activity_at = $1 WHERE id = $2")
            .bind(now)
            .bind(session_id)
            .execute(db)
            .await
            .map_err(classify_sqlx_error)
    })
    .await?;
    Ok(())
}

#[async_trait]
impl SessionStore for SessionRepository {
    async fn create(&self, new_session: NewSession) -> Result<CreatedSession, StoreError> {
        let token = generate_session_token();
        let now = self.clock.now();
        let expires_at = now + self.policy.ttl_for(new_session.remember_me);

        let query = format!(
            "INSERT INTO sessions (id, token_hash, user_id, user_agent, ip_address,
                                   device_fingerprint, remember_me, created_at,
                                   last_activity_at, expires_at, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, $9, TRUE)
             RETURNING {SESSION_COLUMNS}"
        );
        let session = with_timeout(self.timeout, async {
            sqlx::query_as::<_, SessionEntity>(&query)
                .bind(Uuid::new_v4())
                .bind(hash_session_token(&token))
                .bind(new_session.user_id)
                .bind(&new_session.user_agent)
                .bind(&new_session.ip_address)
                .bind(&new_session.device_fingerprint)
                .bind(new_session.remember_me)
                .bind(now)
                .bind(expires_at)
                .fetch_one(&*self.db)
                .await
                .map_err(classify_sqlx_error)
        })
        .await?;

        tracing::info!(
            user_id = %session.user_id,
            session_id = %session.id,
            token = %token_preview(&token),
            remember_me = session.remember_me,
            "Created session"
        );
        Ok(CreatedSession { session, token })
    }

    async fn validate(&self, token: &str) -> Result<Option<SessionWithUser>, StoreError> {
        let now = self.clock.now();
        let query = "SELECT s.id, s.token_hash, s.user_id, s.user_agent, s.ip_address,
                            s.device_fingerprint, s.remember_me, s.created_at,
                            s.last_activity_at, s.expires_at, s.is_active,
                            u.email AS u_email, u.password_hash AS u_password_hash,
                            u.username AS u_username, u.display_name AS u_display_name,
                            u.country AS u_country, u.is_active AS u_is_active,
                            u.created_at AS u_created_at, u.updated_at AS u_updated_at,
                            u.last_login_at AS u_last_login_at
                     FROM sessions s
                     JOIN users u ON u.id = s.user_id
                     WHERE s.token_hash = $1
                       AND s.is_active = TRUE
                       AND s.expires_at > $2
                       AND u.is_active = TRUE";

        let row = with_timeout(self.timeout, async {
            sqlx::query_as::<_, SessionUserRow>(query)
                .bind(hash_session_token(token))
                .bind(now)
                .fetch_optional(&*self.db)
                .await
                .map_err(classify_sqlx_error)
        })
        .await?;

        let Some(row) = row else {
            tracing::debug!(token = %token_preview(token), "Session not usable");
            return Ok(None);
        };

        let found: SessionWithUser = row.into();
        let db = Arc::clone(&self.db);
        let session_id = found.session.id;
        let timeout = self.timeout;
        spawn_best_effort("session activity refresh", async move {
            refresh_activity(&db, session_id, now, timeout).await
        });

        Ok(Some(found))
    }

    async fn invalidate(&self, token: &str) -> Result<bool, StoreError> {
        let result = with_timeout(self.timeout, async {
            sqlx::query(
                "UPDATE sessions SET is_active = FALSE WHERE token_hash = $1 AND is_active = TRUE",
            )
            .bind(hash_session_token(token))
            .execute(&*self.db)
            .await
            .map_err(classify_sqlx_error)
        })
        .await?;

        let affected = result.rows_affected() > 0;
        tracing::info!(token = %token_preview(token), affected, "Invalidated session");
        Ok(affected)
    }

    async fn invalidate_by_id(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<bool, StoreError> {
        let result = with_timeout(self.timeout, async {
            sqlx::query(
                "UPDATE sessions SET is_active = FALSE
                 WHERE id = $1 AND user_id = $2 AND is_active = TRUE",
            )
            .bind(session_id)
            .bind(user_id)
            .execute(&*self.db)
            .await
            .map_err(classify_sqlx_error)
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn invalidate_all_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = with_timeout(self.timeout, async {
            sqlx::query(
                "UPDATE sessions SET is_active = FALSE WHERE user_id = $1 AND is_active = TRUE",
            )
            .bind(user_id)
            .execute(&*self.db)
            .await
            .map_err(classify_sqlx_error)
        })
        .await?;

        let count = result.rows_affected();
        tracing::info!(user_id = %user_id, count, "Invalidated all sessions for user");
        Ok(count)
    }

    async fn list_active_for_user(&self, user_id: Uuid) -> Result<Vec<SessionEntity>, StoreError> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE user_id = $1 AND is_active = TRUE AND expires_at > $2
             ORDER BY last_activity_at DESC"
        );
        with_timeout(self.timeout, async {
            sqlx::query_as::<_, SessionEntity>(&query)
                .bind(user_id)
                .bind(self.clock.now())
                .fetch_all(&*self.db)
                .await
                .map_err(classify_sqlx_error)
        })
        .await
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut total = 0u64;

        // 分批删除，避免单条语句锁住大量行
        loop {
            let result = with_timeout(self.timeout, async {
                sqlx::query(
                    "DELETE FROM sessions WHERE id IN (
                         SELECT id FROM sessions
                         WHERE expires_at <= $1 OR is_active = FALSE
                         LIMIT $2
                     )",
                )
                .bind(now)
                .bind(CLEANUP_BATCH_SIZE)
                .execute(&*self.db)
                .await
                .map_err(classify_sqlx_error)
            })
            .await?;

            let deleted = result.rows_affected();
            total += deleted;
            if deleted < CLEANUP_BATCH_SIZE as u64 {
                break;
            }
            tokio::task::yield_now().await;
        }

        Ok(total)
    }

    async fn extend_expiry(&self, token: &str, hours: Option<i64>) -> Result<bool, StoreError> {
        let hours = hours
            .map(|h| {
                i32::try_from(h)
                    .ok()
                    .filter(|h| *h > 0)
                    .ok_or_else(|| StoreError::Other(format!("invalid session extension: {h}h")))
            })
            .transpose()?;
        let now = self.clock.now();
        // 单条条件更新：显式小时数优先，否则按 remember_me 选择时长
        let result = with_timeout(self.timeout, async {
            sqlx::query(
                "UPDATE sessions
                 SET expires_at = $2 + make_interval(hours => CASE
                         WHEN $3::INT IS NOT NULL THEN $3::INT
                         WHEN remember_me THEN $4::INT
                         ELSE $5::INT
                     END)
                 WHERE token_hash = $1 AND is_active = TRUE AND expires_at > $2",
            )
            .bind(hash_session_token(token))
            .bind(now)
            .bind(hours)
            .bind(policy_hours(self.policy.remember_me_ttl))
            .bind(policy_hours(self.policy.default_ttl))
            .execute(&*self.db)
            .await
            .map_err(classify_sqlx_error)
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
