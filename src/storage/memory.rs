use crate::domain::message::{Message, MessageStatus, NewMessage};
use crate::domain::user::{User, UserProfile};
use crate::error::{AppError, Result};
use crate::storage::{MessageStore, UserStore};
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local store used when no database is configured, and by tests.
///
/// Every write takes the single lock, so `append` and `mark_seen` are serialized:
/// a seen batch sees either all or none of a concurrent append.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    usernames: HashMap<String, Uuid>,
    // Append order doubles as chronological order.
    messages: Vec<Message>,
    index: HashMap<Uuid, usize>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    pub async fn message_count(&self) -> usize {
        self.inner.read().await.messages.len()
    }

    /// Looks up a single message by id.
    pub async fn get(&self, message_id: Uuid) -> Option<Message> {
        let inner = self.inner.read().await;
        inner.index.get(&message_id).map(|&i| inner.messages[i].clone())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: NewMessage) -> Result<Message> {
        let mut inner = self.inner.write().await;

        if !inner.users.contains_key(&message.sender_id) || !inner.users.contains_key(&message.recipient_id) {
            return Err(AppError::NotFound);
        }

        // Keep creation times non-decreasing even if the wall clock steps back.
        let now = OffsetDateTime::now_utc();
        let created_at = inner.messages.last().map_or(now, |last| last.created_at.max(now));

        let stored = Message {
            id: Uuid::now_v7(),
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            body: message.body,
            attachment: message.attachment,
            status: MessageStatus::Sent,
            created_at,
        };

        let position = inner.messages.len();
        inner.index.insert(stored.id, position);
        inner.messages.push(stored.clone());
        Ok(stored)
    }

    async fn query_conversation(&self, user_a: Uuid, user_b: Uuid) -> Result<Vec<Message>> {
        let inner = self.inner.read().await;
        Ok(inner.messages.iter().filter(|m| m.is_between(user_a, user_b)).cloned().collect())
    }

    async fn list_peers(&self, user_id: Uuid) -> Result<Vec<UserProfile>> {
        let inner = self.inner.read().await;

        let mut last_activity: HashMap<Uuid, usize> = HashMap::new();
        for (position, message) in inner.messages.iter().enumerate() {
            if message.sender_id == user_id || message.recipient_id == user_id {
                last_activity.insert(message.peer_of(user_id), position);
            }
        }

        let mut peers: Vec<(usize, UserProfile)> = last_activity
            .into_iter()
            .filter_map(|(peer_id, position)| inner.users.get(&peer_id).map(|u| (position, u.profile())))
            .collect();
        peers.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(peers.into_iter().map(|(_, profile)| profile).collect())
    }

    async fn advance_status(&self, message_id: Uuid, status: MessageStatus) -> Result<Message> {
        let mut inner = self.inner.write().await;
        let position = *inner.index.get(&message_id).ok_or(AppError::NotFound)?;
        let message = &mut inner.messages[position];
        message.status = message.status.advance(status);
        Ok(message.clone())
    }

    async fn mark_seen(&self, from_user: Uuid, to_user: Uuid) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let mut changed = 0;
        for message in inner
            .messages
            .iter_mut()
            .filter(|m| m.sender_id == from_user && m.recipient_id == to_user && m.status != MessageStatus::Seen)
        {
            message.status = MessageStatus::Seen;
            changed += 1;
        }
        Ok(changed)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User> {
        let mut inner = self.inner.write().await;
        if inner.usernames.contains_key(username) {
            return Err(AppError::Conflict("Username already taken".into()));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        inner.usernames.insert(user.username.clone(), user.id);
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner.usernames.get(username).and_then(|id| inner.users.get(id)).cloned())
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self.inner.read().await.users.get(&user_id).cloned())
    }
}
