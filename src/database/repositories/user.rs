// 用户存储库
// 用户凭据与资料的 Postgres 实现

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::UserStore;
use crate::database::models::user::{NewUser, ProfileFields, UserEntity, normalize_email};
use crate::error::{StoreError, classify_sqlx_error};
use crate::utils::with_timeout;

/// 查询共用的列
const USER_COLUMNS: &str = "id, email, password_hash, username, display_name, country, \
                            is_active, created_at, updated_at, last_login_at";

/// 用户存储库
pub struct UserRepository {
    db: Arc<PgPool>,
    timeout: Duration,
}

impl UserRepository {
    /// 创建新的用户存储库实例
    pub fn new(db: Arc<PgPool>, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    async fn fetch_one_by(&self, column: &str, value: &str) -> Result<Option<UserEntity>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1 LIMIT 1");
        with_timeout(self.timeout, async {
            sqlx::query_as::<_, UserEntity>(&query)
                .bind(value)
                .fetch_optional(&*self.db)
                .await
                .map_err(classify_sqlx_error)
        })
        .await
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn create(&self, new_user: NewUser) -> Result<UserEntity, StoreError> {
        let query = format!(
            "INSERT INTO users (id, email, password_hash, username, display_name, country, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, TRUE)
             RETURNING {USER_COLUMNS}"
        );

        // 唯一约束 uq_users_email 才是并发注册的最终保障
        let result = with_timeout(self.timeout, async {
            sqlx::query_as::<_, UserEntity>(&query)
                .bind(Uuid::new_v4())
                .bind(normalize_email(&new_user.email))
                .bind(&new_user.password_hash)
                .bind(&new_user.profile.username)
                .bind(&new_user.profile.display_name)
                .bind(&new_user.profile.country)
                .fetch_one(&*self.db)
                .await
                .map_err(classify_sqlx_error)
        })
        .await;

        match result {
            Ok(user) => {
                tracing::info!(user_id = %user.id, "Created user");
                Ok(user)
            }
            Err(StoreError::DuplicateKey(constraint)) => {
                tracing::debug!(constraint, "Rejected duplicate user email");
                Err(StoreError::DuplicateKey(constraint))
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to create user");
                Err(e)
            }
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserEntity>, StoreError> {
        self.fetch_one_by("email", &normalize_email(email)).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserEntity>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        with_timeout(self.timeout, async {
            sqlx::query_as::<_, UserEntity>(&query)
                .bind(id)
                .fetch_optional(&*self.db)
                .await
                .map_err(classify_sqlx_error)
        })
        .await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserEntity>, StoreError> {
        self.fetch_one_by("username", username.trim()).await
    }

    async fn update_password(&self, id: Uuid, new_hash: &str) -> Result<(), StoreError> {
        let result = with_timeout(self.timeout, async {
            sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
                .bind(new_hash)
                .bind(id)
                .execute(&*self.db)
                .await
                .map_err(classify_sqlx_error)
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        fields: &ProfileFields,
    ) -> Result<UserEntity, StoreError> {
        let query = format!(
            "UPDATE users
             SET username = COALESCE($1, username),
                 display_name = COALESCE($2, display_name),
                 country = COALESCE($3, country),
                 updated_at = NOW()
             WHERE id = $4
             RETURNING {USER_COLUMNS}"
        );
        with_timeout(self.timeout, async {
            sqlx::query_as::<_, UserEntity>(&query)
                .bind(&fields.username)
                .bind(&fields.display_name)
                .bind(&fields.country)
                .bind(id)
                .fetch_optional(&*self.db)
                .await
                .map_err(classify_sqlx_error)
        })
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn update_last_login(&self, id: Uuid) -> Result<(), StoreError> {
        with_timeout(self.timeout, async {
            sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(&*self.db)
                .await
                .map_err(classify_sqlx_error)
        })
        .await?;
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError> {
        let result = with_timeout(self.timeout, async {
            sqlx::query("UPDATE users SET is_active = $1, updated_at = NOW() WHERE id = $2")
                .bind(active)
                .bind(id)
                .execute(&*self.db)
                .await
                .map_err(classify_sqlx_error)
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        // sessions.user_id 外键为 ON DELETE CASCADE
        let result = with_timeout(self.timeout, async {
            sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(id)
                .execute(&*self.db)
                .await
                .map_err(classify_sqlx_error)
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
