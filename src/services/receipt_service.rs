use crate::domain::event::{ServerEvent, StatusUpdate};
use crate::domain::message::MessageStatus;
use crate::error::{AppError, Result};
use crate::services::presence::PresenceRegistry;
use crate::storage::{MessageStore, UserStore};
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    marked_seen_total: Counter<u64>,
    receipts_pushed_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            marked_seen_total: meter
                .u64_counter("parley_messages_marked_seen_total")
                .with_description("Messages transitioned to seen")
                .build(),
            receipts_pushed_total: meter
                .u64_counter("parley_receipts_pushed_total")
                .with_description("Read receipt push attempts")
                .build(),
        }
    }
}

/// Applies read receipts and tells the original sender about them.
#[derive(Clone, Debug)]
pub struct ReceiptService {
    messages: Arc<dyn MessageStore>,
    users: Arc<dyn UserStore>,
    presence: PresenceRegistry,
    metrics: Metrics,
}

impl ReceiptService {
    #[must_use]
    pub fn new(messages: Arc<dyn MessageStore>, users: Arc<dyn UserStore>, presence: PresenceRegistry) -> Self {
        Self { messages, users, presence, metrics: Metrics::new() }
    }

    /// Marks everything `peer_id` has sent to `reader_id` as seen and, if anything changed
    /// and the peer is connected, pushes a receipt to them.
    ///
    /// Calling it again with nothing new to mark changes nothing and pushes nothing.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the peer does not exist.
    #[tracing::instrument(skip(self), fields(reader_id = %reader_id, peer_id = %peer_id), err(level = "debug"))]
    pub async fn mark_seen(&self, reader_id: Uuid, peer_id: Uuid) -> Result<u64> {
        if self.users.find_by_id(peer_id).await?.is_none() {
            return Err(AppError::NotFound);
        }

        // Taken before the update so every message the receipt covers was created no later than `at`.
        let at = OffsetDateTime::now_utc();
        let updated = self.messages.mark_seen(peer_id, reader_id).await?;
        if updated == 0 {
            tracing::trace!("Nothing new to mark seen");
            return Ok(0);
        }

        tracing::debug!(updated, "Marked messages seen");
        self.metrics.marked_seen_total.add(updated, &[]);

        let Some(handle) = self.presence.lookup(peer_id) else {
            self.metrics.receipts_pushed_total.add(1, &[KeyValue::new("outcome", "offline")]);
            return Ok(updated);
        };

        let receipt = ServerEvent::MessageStatus(StatusUpdate {
            sender_id: peer_id,
            seen_by: reader_id,
            status: MessageStatus::Seen,
            at,
        });

        if let Err(e) = handle.push(receipt) {
            tracing::warn!(error = %e, "Failed to push read receipt");
            self.metrics.receipts_pushed_total.add(1, &[KeyValue::new("outcome", "dropped")]);
        } else {
            self.metrics.receipts_pushed_total.add(1, &[KeyValue::new("outcome", "pushed")]);
        }

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::NewMessage;
    use crate::services::presence::ConnectionHandle;
    use crate::storage::memory::MemoryStore;
    use tokio::sync::mpsc;

    async fn setup() -> (Arc<MemoryStore>, PresenceRegistry, ReceiptService, Uuid, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let alice = store.create_user("alice", "x").await.unwrap().id();
        let bob = store.create_user("bob", "x").await.unwrap().id();
        let presence = PresenceRegistry::new();
        let service = ReceiptService::new(
            Arc::clone(&store) as Arc<dyn MessageStore>,
            Arc::clone(&store) as Arc<dyn UserStore>,
            presence.clone(),
        );
        (store, presence, service, alice, bob)
    }

    async fn append(store: &MemoryStore, from: Uuid, to: Uuid) -> Uuid {
        store
            .append(NewMessage { sender_id: from, recipient_id: to, body: Some("hi".into()), attachment: None })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_mark_seen_pushes_receipt_to_online_sender() {
        let (store, presence, service, alice, bob) = setup().await;
        let id = append(&store, alice, bob).await;

        let (tx, mut rx) = mpsc::channel(4);
        presence.register(alice, ConnectionHandle::new(tx));

        assert_eq!(service.mark_seen(bob, alice).await.unwrap(), 1);
        assert_eq!(store.get(id).await.unwrap().status, MessageStatus::Seen);

        match rx.recv().await {
            Some(ServerEvent::MessageStatus(update)) => {
                assert_eq!(update.sender_id, alice);
                assert_eq!(update.seen_by, bob);
                assert_eq!(update.status, MessageStatus::Seen);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mark_seen_is_idempotent() {
        let (store, presence, service, alice, bob) = setup().await;
        append(&store, alice, bob).await;
        let (tx, mut rx) = mpsc::channel(4);
        presence.register(alice, ConnectionHandle::new(tx));

        assert_eq!(service.mark_seen(bob, alice).await.unwrap(), 1);
        assert_eq!(service.mark_seen(bob, alice).await.unwrap(), 0);

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err(), "second call must not push another receipt");
    }

    #[tokio::test]
    async fn test_mark_seen_offline_sender_and_dead_connection() {
        let (store, presence, service, alice, bob) = setup().await;
        append(&store, alice, bob).await;
        assert_eq!(service.mark_seen(bob, alice).await.unwrap(), 1);

        append(&store, alice, bob).await;
        let (tx, rx) = mpsc::channel(1);
        presence.register(alice, ConnectionHandle::new(tx));
        drop(rx);
        assert_eq!(service.mark_seen(bob, alice).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_seen_unknown_peer() {
        let (_store, _presence, service, _alice, bob) = setup().await;
        assert!(matches!(service.mark_seen(bob, Uuid::new_v4()).await, Err(AppError::NotFound)));
    }
}
