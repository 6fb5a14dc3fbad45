use crate::config::DatabaseConfig;
use crate::domain::message::{Message, MessageStatus, NewMessage};
use crate::domain::user::{User, UserProfile};
use crate::error::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use uuid::Uuid;

pub mod memory;
pub mod message_repo;
pub mod records;
pub mod user_repo;

pub type DbPool = Pool<Postgres>;

/// Initializes the database connection pool.
///
/// # Errors
/// Returns `sqlx::Error` if the connection fails.
pub async fn init_pool(url: &str, config: &DatabaseConfig) -> std::result::Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(url)
        .await
}

/// Persistence for chat messages. Rows are only ever appended; the status column
/// is the single mutable field and only moves forward.
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    /// Stores a new message with status `sent`, assigning its id and creation time.
    async fn append(&self, message: NewMessage) -> Result<Message>;

    /// Every message exchanged between the two users, oldest first.
    async fn query_conversation(&self, user_a: Uuid, user_b: Uuid) -> Result<Vec<Message>>;

    /// Users that share at least one message with `user_id`, most recent conversation first.
    async fn list_peers(&self, user_id: Uuid) -> Result<Vec<UserProfile>>;

    /// Moves a message to `status` unless it is already at or beyond it. Returns the stored row.
    async fn advance_status(&self, message_id: Uuid, status: MessageStatus) -> Result<Message>;

    /// Marks every unseen message from `from_user` to `to_user` as seen in one atomic batch.
    /// Returns the number of messages that changed.
    async fn mark_seen(&self, from_user: Uuid, to_user: Uuid) -> Result<u64>;

    /// Cheap connectivity probe used by readiness checks.
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync + std::fmt::Debug {
    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>>;
}
