use crate::domain::message::MessageStatus;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
pub(crate) struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub body: Option<String>,
    pub attachment: Option<String>,
    pub status: MessageStatus,
    pub created_at: OffsetDateTime,
}

impl From<Message> for crate::domain::message::Message {
    fn from(record: Message) -> Self {
        Self {
            id: record.id,
            sender_id: record.sender_id,
            recipient_id: record.recipient_id,
            body: record.body,
            attachment: record.attachment,
            status: record.status,
            created_at: record.created_at,
        }
    }
}
