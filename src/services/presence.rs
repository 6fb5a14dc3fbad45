use crate::domain::event::ServerEvent;
use crate::error::{AppError, Result};
use dashmap::DashMap;
use opentelemetry::{
    global,
    metrics::{Counter, UpDownCounter},
};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    online_users: UpDownCounter<i64>,
    replaced_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            online_users: meter
                .i64_up_down_counter("parley_presence_online_users")
                .with_description("Number of identities with a registered live connection")
                .build(),
            replaced_total: meter
                .u64_counter("parley_presence_replaced_total")
                .with_description("Connections superseded by a newer connection for the same identity")
                .build(),
        }
    }
}

/// Send side of one live gateway connection.
///
/// The registry holds the only long-lived sender. Once it is dropped (on replacement
/// or unregister) the session's receiver drains and the socket closes.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    connection_id: Uuid,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(tx: mpsc::Sender<ServerEvent>) -> Self {
        Self { connection_id: Uuid::new_v4(), tx }
    }

    #[must_use]
    pub const fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Claims one slot in the outbound buffer. Sending through the permit cannot fail.
    ///
    /// # Errors
    /// Returns `AppError::Transport` if the connection is gone or its buffer is full.
    pub fn reserve(&self) -> Result<mpsc::Permit<'_, ServerEvent>> {
        self.tx.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => AppError::Transport("outbound buffer full".into()),
            TrySendError::Closed(()) => AppError::Transport("connection closed".into()),
        })
    }

    /// # Errors
    /// Returns `AppError::Transport` if the connection is gone or its buffer is full.
    pub fn push(&self, event: ServerEvent) -> Result<()> {
        self.reserve()?.send(event);
        Ok(())
    }
}

/// Maps each identity to at most one live connection. Last connection wins.
#[derive(Clone, Debug)]
pub struct PresenceRegistry {
    connections: Arc<DashMap<Uuid, ConnectionHandle>>,
    metrics: Metrics,
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { connections: Arc::new(DashMap::new()), metrics: Metrics::new() }
    }

    /// Registers `handle` for `user_id`, returning the connection it replaced, if any.
    #[tracing::instrument(level = "debug", skip(self, handle), fields(connection_id = %handle.connection_id()))]
    pub fn register(&self, user_id: Uuid, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let replaced = self.connections.insert(user_id, handle);
        if replaced.is_some() {
            tracing::info!("Superseded an existing connection");
            self.metrics.replaced_total.add(1, &[]);
        } else {
            self.metrics.online_users.add(1, &[]);
        }
        replaced
    }

    /// Removes the entry for `user_id` if it still belongs to `connection_id`.
    ///
    /// A connection that was already replaced leaves the newer entry in place.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn unregister(&self, user_id: Uuid, connection_id: Uuid) -> bool {
        let removed = self.connections.remove_if(&user_id, |_, h| h.connection_id == connection_id).is_some();
        if removed {
            self.metrics.online_users.add(-1, &[]);
        }
        removed
    }

    #[must_use]
    pub fn lookup(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.connections.get(&user_id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.connections.contains_key(&user_id)
    }

    #[must_use]
    pub fn online_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::StatusUpdate;
    use crate::domain::message::MessageStatus;
    use time::OffsetDateTime;

    fn status_event() -> ServerEvent {
        ServerEvent::MessageStatus(StatusUpdate {
            sender_id: Uuid::new_v4(),
            seen_by: Uuid::new_v4(),
            status: MessageStatus::Seen,
            at: OffsetDateTime::now_utc(),
        })
    }

    #[tokio::test]
    async fn test_register_lookup_unregister() {
        let registry = PresenceRegistry::new();
        let user_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(4);
        let handle = ConnectionHandle::new(tx);
        let connection_id = handle.connection_id();

        assert!(registry.register(user_id, handle).is_none());
        assert!(registry.is_online(user_id));

        registry.lookup(user_id).expect("registered").push(status_event()).expect("push succeeds");
        assert!(rx.recv().await.is_some());

        assert!(registry.unregister(user_id, connection_id));
        assert!(registry.lookup(user_id).is_none());
        assert_eq!(registry.online_count(), 0);
    }

    #[tokio::test]
    async fn test_last_connection_wins() {
        let registry = PresenceRegistry::new();
        let user_id = Uuid::new_v4();

        let (old_tx, mut old_rx) = mpsc::channel(4);
        let old = ConnectionHandle::new(old_tx);
        let old_id = old.connection_id();
        registry.register(user_id, old);

        let (new_tx, mut new_rx) = mpsc::channel(4);
        let new = ConnectionHandle::new(new_tx);
        let new_id = new.connection_id();
        let replaced = registry.register(user_id, new).expect("old handle returned");
        assert_eq!(replaced.connection_id(), old_id);
        drop(replaced);

        // The superseded session sees its channel close.
        assert!(old_rx.recv().await.is_none());

        // A late disconnect from the old connection must not evict the new one.
        assert!(!registry.unregister(user_id, old_id));
        assert_eq!(registry.lookup(user_id).map(|h| h.connection_id()), Some(new_id));

        registry.lookup(user_id).unwrap().push(status_event()).unwrap();
        assert!(new_rx.recv().await.is_some());
    }

    #[test]
    fn test_push_to_dead_or_full_connection_is_transport_error() {
        let (tx, rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(tx);

        handle.push(status_event()).expect("first push fits");
        assert!(matches!(handle.push(status_event()), Err(AppError::Transport(_))));

        drop(rx);
        assert!(matches!(handle.push(status_event()), Err(AppError::Transport(_))));
    }
}
