use crate::config::MessagingConfig;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Delivery state of a message. Variants are declared in lifecycle order so the
/// derived `Ord` (and the matching PostgreSQL enum ordering) reflects progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
}

impl MessageStatus {
    /// Returns true if moving to `next` is a forward transition.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        next > self
    }

    /// Applies a transition request, ignoring anything that would move backwards.
    #[must_use]
    pub fn advance(self, next: Self) -> Self {
        if self.can_advance_to(next) { next } else { self }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    #[serde(rename = "text", default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(rename = "image", default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    pub status: MessageStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Message {
    /// Returns true if the message belongs to the conversation between `a` and `b`.
    #[must_use]
    pub fn is_between(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender_id == a && self.recipient_id == b) || (self.sender_id == b && self.recipient_id == a)
    }

    /// The other participant from `viewer`'s point of view.
    #[must_use]
    pub fn peer_of(&self, viewer: Uuid) -> Uuid {
        if self.sender_id == viewer { self.recipient_id } else { self.sender_id }
    }
}

/// Content of a send request before it is validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageDraft {
    pub body: Option<String>,
    pub attachment: Option<String>,
}

impl MessageDraft {
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self { body: Some(body.into()), attachment: None }
    }

    /// Normalizes blank fields away and enforces the configured size limits.
    ///
    /// # Errors
    /// Returns `AppError::Validation` if neither text nor attachment remains, or a field is too long.
    pub fn validate(self, limits: &MessagingConfig) -> Result<Self> {
        let body = self.body.map(|b| b.trim().to_string()).filter(|b| !b.is_empty());
        let attachment = self.attachment.map(|a| a.trim().to_string()).filter(|a| !a.is_empty());

        if body.is_none() && attachment.is_none() {
            return Err(AppError::Validation("Message must contain text or an image".into()));
        }

        if let Some(b) = &body
            && b.chars().count() > limits.max_text_len
        {
            return Err(AppError::Validation(format!(
                "Message text exceeds the maximum of {} characters",
                limits.max_text_len
            )));
        }

        if let Some(a) = &attachment
            && a.len() > limits.max_attachment_len
        {
            return Err(AppError::Validation(format!(
                "Attachment exceeds the maximum of {} bytes",
                limits.max_attachment_len
            )));
        }

        Ok(Self { body, attachment })
    }
}

/// A validated message ready to be appended to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub body: Option<String>,
    pub attachment: Option<String>,
}

impl NewMessage {
    #[must_use]
    pub fn new(sender_id: Uuid, recipient_id: Uuid, draft: MessageDraft) -> Self {
        Self { sender_id, recipient_id, body: draft.body, attachment: draft.attachment }
    }
}
