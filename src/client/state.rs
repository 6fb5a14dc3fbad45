use crate::domain::message::{Message, MessageStatus};
use crate::domain::user::UserProfile;
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unread marker for a message from a peer whose conversation is not open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub sender: UserProfile,
    pub message: Message,
}

/// Everything a chat view renders. Only mutated through the operations below.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    selected_peer: Option<UserProfile>,
    messages: Vec<Message>,
    notifications: Vec<Notification>,
    peers: Vec<UserProfile>,
    is_peers_loading: bool,
    is_messages_loading: bool,
    // (sender, reader) -> time of the latest seen receipt
    receipts: HashMap<(Uuid, Uuid), OffsetDateTime>,
    notices: Vec<String>,
}

impl ConversationState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn selected_peer(&self) -> Option<&UserProfile> {
        self.selected_peer.as_ref()
    }

    #[must_use]
    pub fn is_selected(&self, peer_id: Uuid) -> bool {
        self.selected_peer.as_ref().is_some_and(|p| p.id == peer_id)
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    #[must_use]
    pub fn peers(&self) -> &[UserProfile] {
        &self.peers
    }

    #[must_use]
    pub const fn is_peers_loading(&self) -> bool {
        self.is_peers_loading
    }

    #[must_use]
    pub const fn is_messages_loading(&self) -> bool {
        self.is_messages_loading
    }

    /// Opens `peer`'s conversation with an empty message list until history arrives.
    ///
    /// The peer's notifications are dropped here, whether or not the history pull succeeds.
    pub fn select_peer(&mut self, peer: UserProfile) {
        self.messages.clear();
        self.is_messages_loading = true;
        self.clear_notifications(peer.id);
        self.selected_peer = Some(peer);
    }

    pub fn clear_selection(&mut self) {
        self.selected_peer = None;
        self.messages.clear();
        self.is_messages_loading = false;
    }

    /// Adds a live message to the open conversation. A message already held is not
    /// duplicated, though its status may move forward. Returns true if it was new.
    pub fn append_message(&mut self, mut message: Message) -> bool {
        if let Some(existing) = self.messages.iter_mut().find(|m| m.id == message.id) {
            existing.status = existing.status.advance(message.status);
            return false;
        }

        self.apply_receipts(&mut message);
        self.messages.push(message);
        true
    }

    /// Replaces the open conversation with `history`, keeping live messages that arrived
    /// while it was being fetched. Ignored if `peer_id` is no longer selected.
    pub fn merge_history(&mut self, peer_id: Uuid, history: Vec<Message>) -> bool {
        if !self.is_selected(peer_id) {
            return false;
        }

        let mut live = std::mem::take(&mut self.messages);
        let mut merged = Vec::with_capacity(history.len() + live.len());

        for mut message in history {
            if let Some(pos) = live.iter().position(|m| m.id == message.id) {
                let held = live.swap_remove(pos);
                message.status = message.status.advance(held.status);
            }
            self.apply_receipts(&mut message);
            merged.push(message);
        }

        merged.append(&mut live);
        merged.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        self.messages = merged;
        self.is_messages_loading = false;
        true
    }

    /// Records an unread message from `sender`. The sender joins the peer list if new.
    pub fn enqueue_notification(&mut self, sender: UserProfile, message: Message) -> bool {
        if self.notifications.iter().any(|n| n.message.id == message.id) {
            return false;
        }

        if !self.peers.iter().any(|p| p.id == sender.id) {
            self.peers.insert(0, sender.clone());
        }
        self.notifications.push(Notification { sender, message });
        true
    }

    /// Drops every notification from `peer_id`, returning how many were removed.
    pub fn clear_notifications(&mut self, peer_id: Uuid) -> usize {
        let before = self.notifications.len();
        self.notifications.retain(|n| n.sender.id != peer_id);
        before - self.notifications.len()
    }

    #[must_use]
    pub fn unread_count(&self, peer_id: Uuid) -> usize {
        self.notifications.iter().filter(|n| n.sender.id == peer_id).count()
    }

    /// Marks every held message from `sender_id` to `seen_by` as seen.
    ///
    /// The receipt is remembered so a message that shows up later, such as the
    /// response to a send still in flight, is updated as well if it is covered by `at`.
    pub fn apply_seen(&mut self, sender_id: Uuid, seen_by: Uuid, at: OffsetDateTime) -> usize {
        let latest = self.receipts.entry((sender_id, seen_by)).or_insert(at);
        *latest = (*latest).max(at);
        self.sweep_seen(sender_id, seen_by)
    }

    /// Marks every held message from `sender_id` to `seen_by` as seen without remembering
    /// a cutoff, for when no server timestamp is at hand.
    pub fn sweep_seen(&mut self, sender_id: Uuid, seen_by: Uuid) -> usize {
        let mut changed = 0;
        for message in &mut self.messages {
            if message.sender_id == sender_id && message.recipient_id == seen_by && message.status != MessageStatus::Seen
            {
                message.status = MessageStatus::Seen;
                changed += 1;
            }
        }
        changed
    }

    pub fn begin_peers_loading(&mut self) {
        self.is_peers_loading = true;
    }

    pub fn set_peers(&mut self, peers: Vec<UserProfile>) {
        self.peers = peers;
        self.is_peers_loading = false;
    }

    /// Called when a fetch fails so the view does not spin forever.
    pub fn finish_loading(&mut self) {
        self.is_peers_loading = false;
        self.is_messages_loading = false;
    }

    pub fn push_notice(&mut self, notice: impl Into<String>) {
        self.notices.push(notice.into());
    }

    /// Returns and clears pending user-visible notices.
    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    fn apply_receipts(&self, message: &mut Message) {
        if let Some(at) = self.receipts.get(&(message.sender_id, message.recipient_id))
            && message.created_at <= *at
        {
            message.status = message.status.advance(MessageStatus::Seen);
        }
    }
}
