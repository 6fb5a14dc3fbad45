use crate::client::push::{PushChannel, PushSignal, Subscription};
use crate::client::state::ConversationState;
use crate::client::transport::ChatTransport;
use crate::client::{ClientError, ClientResult};
use crate::domain::event::{ServerEvent, StatusUpdate};
use crate::domain::message::{Message, MessageDraft, MessageStatus};
use crate::domain::user::UserProfile;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

/// Keeps a [`ConversationState`] in step with the server for one signed-in user.
///
/// Pull results and push events both flow through here; the state is never
/// touched by the transport directly.
pub struct ChatClient<T> {
    me: UserProfile,
    transport: Arc<T>,
    state: Arc<Mutex<ConversationState>>,
}

impl<T> Clone for ChatClient<T> {
    fn clone(&self) -> Self {
        Self { me: self.me.clone(), transport: Arc::clone(&self.transport), state: Arc::clone(&self.state) }
    }
}

impl<T> std::fmt::Debug for ChatClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient").field("me", &self.me).finish_non_exhaustive()
    }
}

impl<T: ChatTransport + 'static> ChatClient<T> {
    pub fn new(me: UserProfile, transport: T) -> Self {
        Self { me, transport: Arc::new(transport), state: Arc::new(Mutex::new(ConversationState::new())) }
    }

    #[must_use]
    pub const fn me(&self) -> &UserProfile {
        &self.me
    }

    /// A copy of the current view state.
    pub async fn snapshot(&self) -> ConversationState {
        self.state.lock().await.clone()
    }

    /// Drains notices raised by failed calls.
    pub async fn take_notices(&self) -> Vec<String> {
        self.state.lock().await.take_notices()
    }

    /// # Errors
    /// Returns the transport error; it is also recorded as a notice.
    pub async fn load_peers(&self) -> ClientResult<Vec<UserProfile>> {
        self.state.lock().await.begin_peers_loading();

        match self.transport.list_peers().await {
            Ok(peers) => {
                self.state.lock().await.set_peers(peers.clone());
                Ok(peers)
            }
            Err(e) => Err(self.fail("Could not load conversations", e).await),
        }
    }

    /// Opens `peer`'s conversation: clears its notifications, pulls history and marks it seen.
    ///
    /// If another conversation is opened while history is loading, the stale result is dropped.
    ///
    /// # Errors
    /// Returns the transport error; it is also recorded as a notice.
    #[tracing::instrument(skip(self, peer), fields(peer_id = %peer.id))]
    pub async fn open_conversation(&self, peer: UserProfile) -> ClientResult<()> {
        let peer_id = peer.id;
        self.state.lock().await.select_peer(peer);

        let history = match self.transport.fetch_conversation(peer_id).await {
            Ok(history) => history,
            Err(e) => return Err(self.fail("Could not load messages", e).await),
        };

        if !self.state.lock().await.merge_history(peer_id, history) {
            tracing::debug!("Conversation changed while loading, discarding history");
            return Ok(());
        }

        self.mark_seen(peer_id).await
    }

    pub async fn close_conversation(&self) {
        self.state.lock().await.clear_selection();
    }

    /// # Errors
    /// Returns the transport error; it is also recorded as a notice.
    pub async fn send(&self, peer_id: Uuid, draft: MessageDraft) -> ClientResult<Message> {
        match self.transport.send_message(peer_id, &draft).await {
            Ok(message) => {
                let mut state = self.state.lock().await;
                if state.is_selected(peer_id) {
                    state.append_message(message.clone());
                }
                Ok(message)
            }
            Err(e) => Err(self.fail("Could not send message", e).await),
        }
    }

    /// Applies one push event to the local state.
    ///
    /// # Errors
    /// Returns the transport error if marking an incoming message seen fails.
    pub async fn handle_event(&self, event: ServerEvent) -> ClientResult<()> {
        match event {
            ServerEvent::NewMessage { message, sender } => {
                if message.recipient_id != self.me.id {
                    tracing::debug!(message_id = %message.id, "Ignoring message addressed to someone else");
                    return Ok(());
                }

                let viewing = {
                    let mut state = self.state.lock().await;
                    if state.is_selected(sender.id) {
                        state.append_message(message);
                        true
                    } else {
                        state.enqueue_notification(sender.clone(), message);
                        false
                    }
                };

                if viewing {
                    self.mark_seen(sender.id).await?;
                }
                Ok(())
            }
            ServerEvent::MessageStatus(update) => {
                if update.status == MessageStatus::Seen {
                    self.state.lock().await.apply_seen(update.sender_id, update.seen_by, update.at);
                }
                Ok(())
            }
        }
    }

    /// Re-pulls peers and the open conversation after the push channel reconnects.
    ///
    /// # Errors
    /// Returns the first transport error encountered.
    pub async fn resync(&self) -> ClientResult<()> {
        self.load_peers().await?;

        let selected = self.state.lock().await.selected_peer().cloned();
        if let Some(peer) = selected {
            let history = match self.transport.fetch_conversation(peer.id).await {
                Ok(history) => history,
                Err(e) => return Err(self.fail("Could not refresh messages", e).await),
            };
            if self.state.lock().await.merge_history(peer.id, history) {
                self.mark_seen(peer.id).await?;
            }
        }
        Ok(())
    }

    /// Starts consuming `channel`, feeding every event through [`Self::handle_event`] after
    /// handing it to the matching callback.
    pub fn subscribe<N, S>(&self, channel: PushChannel, mut on_new_message: N, mut on_status: S) -> Subscription
    where
        N: FnMut(&Message, &UserProfile) + Send + 'static,
        S: FnMut(&StatusUpdate) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(64);
        let push_task = channel.spawn(tx);

        let client = self.clone();
        let handler_task = tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                let result = match signal {
                    PushSignal::Event(event) => {
                        match &event {
                            ServerEvent::NewMessage { message, sender } => on_new_message(message, sender),
                            ServerEvent::MessageStatus(update) => on_status(update),
                        }
                        client.handle_event(event).await
                    }
                    PushSignal::Reconnected => client.resync().await,
                    PushSignal::Superseded => {
                        client.state.lock().await.push_notice("Signed in from another session");
                        break;
                    }
                };

                if let Err(e) = result {
                    tracing::warn!(error = %e, "Failed to apply push signal");
                }
            }
        });

        Subscription::new(vec![push_task, handler_task])
    }

    async fn mark_seen(&self, peer_id: Uuid) -> ClientResult<()> {
        if let Err(e) = self.transport.mark_seen(peer_id).await {
            return Err(self.fail("Could not update read status", e).await);
        }
        self.state.lock().await.sweep_seen(peer_id, self.me.id);
        Ok(())
    }

    async fn fail(&self, notice: &str, error: ClientError) -> ClientError {
        tracing::warn!(error = %error, "{notice}");
        let mut state = self.state.lock().await;
        state.finish_loading();
        state.push_notice(format!("{notice}: {error}"));
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use time::OffsetDateTime;

    #[derive(Default)]
    struct FakeTransport {
        me: Uuid,
        conversations: StdMutex<Vec<Message>>,
        seen_calls: StdMutex<Vec<Uuid>>,
        fail_sends: bool,
        fail_fetches: bool,
    }

    impl FakeTransport {
        fn seen_calls(&self) -> Vec<Uuid> {
            self.seen_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatTransport for FakeTransport {
        async fn list_peers(&self) -> ClientResult<Vec<UserProfile>> {
            Ok(Vec::new())
        }

        async fn fetch_conversation(&self, peer_id: Uuid) -> ClientResult<Vec<Message>> {
            if self.fail_fetches {
                return Err(ClientError::Rejected { status: 500, message: "unavailable".into() });
            }
            let all = self.conversations.lock().unwrap();
            Ok(all.iter().filter(|m| m.is_between(self.me, peer_id)).cloned().collect())
        }

        async fn send_message(&self, peer_id: Uuid, draft: &MessageDraft) -> ClientResult<Message> {
            if self.fail_sends {
                return Err(ClientError::Rejected { status: 500, message: "boom".into() });
            }
            let message = message(self.me, peer_id, draft.body.as_deref().unwrap_or_default());
            self.conversations.lock().unwrap().push(message.clone());
            Ok(message)
        }

        async fn mark_seen(&self, peer_id: Uuid) -> ClientResult<()> {
            self.seen_calls.lock().unwrap().push(peer_id);
            Ok(())
        }
    }

    fn profile(name: &str) -> UserProfile {
        UserProfile { id: Uuid::new_v4(), username: name.to_string() }
    }

    fn message(from: Uuid, to: Uuid, text: &str) -> Message {
        Message {
            id: Uuid::now_v7(),
            sender_id: from,
            recipient_id: to,
            body: Some(text.to_string()),
            attachment: None,
            status: MessageStatus::Sent,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn client(me: &UserProfile, history: Vec<Message>) -> ChatClient<FakeTransport> {
        let transport =
            FakeTransport { me: me.id, conversations: StdMutex::new(history), ..FakeTransport::default() };
        ChatClient::new(me.clone(), transport)
    }

    #[tokio::test]
    async fn test_open_conversation_pulls_clears_and_marks_seen() {
        let (me, alice) = (profile("bob"), profile("alice"));
        let pending = message(alice.id, me.id, "hello");
        let client = client(&me, vec![pending.clone()]);

        client
            .handle_event(ServerEvent::NewMessage { message: pending.clone(), sender: alice.clone() })
            .await
            .unwrap();
        assert_eq!(client.snapshot().await.unread_count(alice.id), 1);

        client.open_conversation(alice.clone()).await.unwrap();

        let state = client.snapshot().await;
        assert_eq!(state.unread_count(alice.id), 0);
        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.messages()[0].status, MessageStatus::Seen);
        assert_eq!(client.transport.seen_calls(), vec![alice.id]);
    }

    #[tokio::test]
    async fn test_message_for_open_peer_is_appended_and_marked_seen() {
        let (me, alice) = (profile("bob"), profile("alice"));
        let client = client(&me, Vec::new());
        client.open_conversation(alice.clone()).await.unwrap();

        let live = message(alice.id, me.id, "live");
        client.handle_event(ServerEvent::NewMessage { message: live.clone(), sender: alice.clone() }).await.unwrap();
        client.handle_event(ServerEvent::NewMessage { message: live, sender: alice.clone() }).await.unwrap();

        let state = client.snapshot().await;
        assert_eq!(state.messages().len(), 1);
        assert!(state.notifications().is_empty());
        assert_eq!(client.transport.seen_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_messages_from_other_peer_become_notifications() {
        let (me, alice, carol) = (profile("bob"), profile("alice"), profile("carol"));
        let first = message(alice.id, me.id, "one");
        let second = message(alice.id, me.id, "two");
        let client = client(&me, vec![first.clone(), second.clone()]);

        client.open_conversation(carol.clone()).await.unwrap();
        for m in [&first, &second] {
            client
                .handle_event(ServerEvent::NewMessage { message: m.clone(), sender: alice.clone() })
                .await
                .unwrap();
        }

        let state = client.snapshot().await;
        assert!(state.messages().is_empty());
        assert_eq!(state.unread_count(alice.id), 2);

        client.open_conversation(alice.clone()).await.unwrap();
        let state = client.snapshot().await;
        assert_eq!(state.unread_count(alice.id), 0);
        let ids: Vec<Uuid> = state.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_seen_receipt_updates_own_messages() {
        let (me, alice) = (profile("alice"), profile("bob"));
        let client = client(&me, Vec::new());
        client.open_conversation(alice.clone()).await.unwrap();

        let sent = client.send(alice.id, MessageDraft::text("hi")).await.unwrap();
        assert_eq!(client.snapshot().await.messages()[0].status, MessageStatus::Sent);

        client
            .handle_event(ServerEvent::MessageStatus(StatusUpdate {
                sender_id: me.id,
                seen_by: alice.id,
                status: MessageStatus::Seen,
                at: OffsetDateTime::now_utc(),
            }))
            .await
            .unwrap();

        let state = client.snapshot().await;
        assert_eq!(state.messages()[0].id, sent.id);
        assert_eq!(state.messages()[0].status, MessageStatus::Seen);
    }

    #[tokio::test]
    async fn test_failed_history_pull_leaves_no_notifications_for_open_peer() {
        let (me, alice) = (profile("bob"), profile("alice"));
        let transport = FakeTransport { me: me.id, fail_fetches: true, ..FakeTransport::default() };
        let client = ChatClient::new(me.clone(), transport);

        let pending = message(alice.id, me.id, "hello");
        client.handle_event(ServerEvent::NewMessage { message: pending, sender: alice.clone() }).await.unwrap();
        assert_eq!(client.snapshot().await.unread_count(alice.id), 1);

        assert!(client.open_conversation(alice.clone()).await.is_err());

        let state = client.snapshot().await;
        assert!(state.is_selected(alice.id));
        assert_eq!(state.unread_count(alice.id), 0);
        assert!(!state.is_messages_loading());

        let live = message(alice.id, me.id, "still there?");
        client.handle_event(ServerEvent::NewMessage { message: live, sender: alice.clone() }).await.unwrap();

        let state = client.snapshot().await;
        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.unread_count(alice.id), 0);
        assert!(client.take_notices().await[0].starts_with("Could not load messages"));
    }

    #[tokio::test]
    async fn test_failed_send_raises_notice() {
        let me = profile("alice");
        let transport = FakeTransport { me: me.id, fail_sends: true, ..FakeTransport::default() };
        let client = ChatClient::new(me, transport);

        assert!(client.send(Uuid::new_v4(), MessageDraft::text("hi")).await.is_err());
        let notices = client.take_notices().await;
        assert_eq!(notices.len(), 1);
        assert!(notices[0].starts_with("Could not send message"));
    }
}
