use crate::domain::user::User;
use crate::error::{AppError, Result};
use crate::storage::records;
use crate::storage::{DbPool, UserStore};
use async_trait::async_trait;
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone, Debug)]
pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for UserRepository {
    /// # Errors
    /// Returns `AppError::Conflict` if the username is taken.
    #[tracing::instrument(level = "debug", skip(self, password_hash))]
    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User> {
        let result = sqlx::query_as::<_, records::User>(
            r"
            INSERT INTO users (id, username, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, username, password_hash, created_at
            ",
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(record) => Ok(record.into()),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(AppError::Conflict("Username already taken".into()))
            }
            Err(e) => Err(AppError::Database(e)),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, records::User>(
            r"
            SELECT id, username, password_hash, created_at
            FROM users
            WHERE username = $1
            ",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user.map(Into::into))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, records::User>(
            r"
            SELECT id, username, password_hash, created_at
            FROM users
            WHERE id = $1
            ",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user.map(Into::into))
    }
}
