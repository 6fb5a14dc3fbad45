use crate::config::MessagingConfig;
use crate::domain::event::ServerEvent;
use crate::domain::message::{Message, MessageDraft, MessageStatus, NewMessage};
use crate::domain::user::UserProfile;
use crate::error::{AppError, Result};
use crate::services::presence::{ConnectionHandle, PresenceRegistry};
use crate::storage::{MessageStore, UserStore};
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    sent_total: Counter<u64>,
    push_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            sent_total: meter
                .u64_counter("parley_messages_sent_total")
                .with_description("Messages accepted and persisted")
                .build(),
            push_total: meter
                .u64_counter("parley_messages_push_total")
                .with_description("Live push outcomes for newly sent messages")
                .build(),
        }
    }
}

/// Accepts messages, persists them, and pushes them to recipients that are online.
#[derive(Clone, Debug)]
pub struct MessageService {
    messages: Arc<dyn MessageStore>,
    users: Arc<dyn UserStore>,
    presence: PresenceRegistry,
    limits: MessagingConfig,
    metrics: Metrics,
}

impl MessageService {
    #[must_use]
    pub fn new(
        messages: Arc<dyn MessageStore>,
        users: Arc<dyn UserStore>,
        presence: PresenceRegistry,
        limits: MessagingConfig,
    ) -> Self {
        Self { messages, users, presence, limits, metrics: Metrics::new() }
    }

    /// Stores a message and pushes it to the recipient if they are connected.
    ///
    /// The returned message carries the furthest status reached: `delivered` when the
    /// push was handed to the recipient's connection, `sent` otherwise.
    ///
    /// # Errors
    /// Returns `AppError::Validation` if the draft has no content or exceeds limits.
    /// Returns `AppError::NotFound` if the sender or recipient does not exist.
    /// Returns a storage error if the message could not be persisted.
    #[tracing::instrument(
        skip(self, draft),
        fields(sender_id = %sender_id, recipient_id = %recipient_id, message_id = tracing::field::Empty),
        err(level = "debug")
    )]
    pub async fn send(&self, sender_id: Uuid, recipient_id: Uuid, draft: MessageDraft) -> Result<Message> {
        let draft = draft.validate(&self.limits)?;

        let sender = self.users.find_by_id(sender_id).await?.ok_or(AppError::NotFound)?;
        if self.users.find_by_id(recipient_id).await?.is_none() {
            return Err(AppError::NotFound);
        }

        let message = self.messages.append(NewMessage::new(sender_id, recipient_id, draft)).await?;
        tracing::Span::current().record("message_id", tracing::field::display(message.id));
        self.metrics.sent_total.add(1, &[]);

        let Some(handle) = self.presence.lookup(recipient_id) else {
            tracing::debug!("Recipient offline, message left for pull");
            self.metrics.push_total.add(1, &[KeyValue::new("outcome", "offline")]);
            return Ok(message);
        };

        match self.deliver(&handle, &message, sender.profile()).await {
            Ok(delivered) => {
                self.metrics.push_total.add(1, &[KeyValue::new("outcome", "delivered")]);
                Ok(delivered)
            }
            Err(AppError::Transport(reason)) => {
                tracing::warn!(%reason, "Live push failed, message left for pull");
                self.metrics.push_total.add(1, &[KeyValue::new("outcome", "dropped")]);
                Ok(message)
            }
            Err(e) => {
                // The message is stored; failing the request would invite a duplicate resend.
                tracing::error!(error = %e, "Failed to record delivery, message left for pull");
                self.metrics.push_total.add(1, &[KeyValue::new("outcome", "error")]);
                Ok(message)
            }
        }
    }

    /// Persists `delivered` before the push becomes visible to the recipient, so a seen
    /// receipt can never overtake it.
    async fn deliver(&self, handle: &ConnectionHandle, message: &Message, sender: UserProfile) -> Result<Message> {
        let permit = handle.reserve()?;
        let delivered = self.messages.advance_status(message.id, MessageStatus::Delivered).await?;
        permit.send(ServerEvent::NewMessage { message: delivered.clone(), sender });
        Ok(delivered)
    }

    /// Full history between `user_id` and `peer_id`, oldest first.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the peer does not exist.
    #[tracing::instrument(skip(self), err(level = "debug"))]
    pub async fn conversation(&self, user_id: Uuid, peer_id: Uuid) -> Result<Vec<Message>> {
        if self.users.find_by_id(peer_id).await?.is_none() {
            return Err(AppError::NotFound);
        }
        self.messages.query_conversation(user_id, peer_id).await
    }

    /// # Errors
    /// Returns a storage error if the lookup fails.
    #[tracing::instrument(skip(self), err(level = "debug"))]
    pub async fn peers(&self, user_id: Uuid) -> Result<Vec<UserProfile>> {
        self.messages.list_peers(user_id).await
    }
}
