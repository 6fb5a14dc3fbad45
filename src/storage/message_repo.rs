use crate::domain::message::{Message, MessageStatus, NewMessage};
use crate::domain::user::UserProfile;
use crate::error::{AppError, Result};
use crate::storage::records;
use crate::storage::{DbPool, MessageStore};
use async_trait::async_trait;
use uuid::Uuid;

const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Clone, Debug)]
pub struct MessageRepository {
    pool: DbPool,
}

impl MessageRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for MessageRepository {
    /// # Errors
    /// Returns `AppError::NotFound` if either participant does not exist.
    /// Returns `AppError::Database` if the insert fails.
    #[tracing::instrument(level = "debug", skip(self, message), fields(sender_id = %message.sender_id, recipient_id = %message.recipient_id))]
    async fn append(&self, message: NewMessage) -> Result<Message> {
        let result = sqlx::query_as::<_, records::Message>(
            r"
            INSERT INTO messages (id, sender_id, recipient_id, body, attachment, status)
            VALUES ($1, $2, $3, $4, $5, 'sent')
            RETURNING id, sender_id, recipient_id, body, attachment, status, created_at
            ",
        )
        .bind(Uuid::now_v7())
        .bind(message.sender_id)
        .bind(message.recipient_id)
        .bind(message.body)
        .bind(message.attachment)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(record) => Ok(record.into()),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) => {
                Err(AppError::NotFound)
            }
            Err(e) => Err(AppError::Database(e)),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn query_conversation(&self, user_a: Uuid, user_b: Uuid) -> Result<Vec<Message>> {
        let messages = sqlx::query_as::<_, records::Message>(
            r"
            SELECT id, sender_id, recipient_id, body, attachment, status, created_at
            FROM messages
            WHERE (sender_id = $1 AND recipient_id = $2)
               OR (sender_id = $2 AND recipient_id = $1)
            ORDER BY created_at ASC, id ASC
            ",
        )
        .bind(user_a)
        .bind(user_b)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_peers(&self, user_id: Uuid) -> Result<Vec<UserProfile>> {
        let peers = sqlx::query_as::<_, records::Profile>(
            r"
            SELECT u.id, u.username
            FROM users u
            JOIN (
                SELECT CASE WHEN sender_id = $1 THEN recipient_id ELSE sender_id END AS peer_id,
                       MAX(created_at) AS last_at
                FROM messages
                WHERE sender_id = $1 OR recipient_id = $1
                GROUP BY 1
            ) c ON c.peer_id = u.id
            ORDER BY c.last_at DESC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(peers.into_iter().map(Into::into).collect())
    }

    /// # Errors
    /// Returns `AppError::NotFound` if the message does not exist.
    #[tracing::instrument(level = "debug", skip(self))]
    async fn advance_status(&self, message_id: Uuid, status: MessageStatus) -> Result<Message> {
        // Enum comparison follows declaration order, so GREATEST never moves a row backwards.
        let record = sqlx::query_as::<_, records::Message>(
            r"
            UPDATE messages
            SET status = GREATEST(status, $2)
            WHERE id = $1
            RETURNING id, sender_id, recipient_id, body, attachment, status, created_at
            ",
        )
        .bind(message_id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        record.map(Into::into).ok_or(AppError::NotFound)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn mark_seen(&self, from_user: Uuid, to_user: Uuid) -> Result<u64> {
        // A single statement: rows committed after its snapshot are left untouched.
        let result = sqlx::query(
            r"
            UPDATE messages
            SET status = 'seen'
            WHERE sender_id = $1 AND recipient_id = $2 AND status <> 'seen'
            ",
        )
        .bind(from_user)
        .bind(to_user)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
