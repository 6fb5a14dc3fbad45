#![allow(clippy::unwrap_used, clippy::panic, missing_debug_implementations, unreachable_pub)]
mod common;

use common::TestApp;
use parley_server::client::{ChatClient, ConversationState, HttpChatApi, PushChannel};
use parley_server::domain::message::{MessageDraft, MessageStatus};
use std::future::Future;
use std::time::Duration;

async fn signed_in(app: &TestApp, username: &str) -> (ChatClient<HttpChatApi>, PushChannel) {
    let (api, me) = HttpChatApi::signup(&app.server_url, username, "password123").await.unwrap();
    let channel = PushChannel::new(api.gateway_url().unwrap());
    (ChatClient::new(me, api), channel)
}

async fn eventually<F, Fut>(client: &ChatClient<HttpChatApi>, check: F)
where
    F: Fn(ConversationState) -> Fut,
    Fut: Future<Output = bool>,
{
    let wait = async {
        loop {
            if check(client.snapshot().await).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait).await.expect("state never converged");
}

async fn wait_online(app: &TestApp, client: &ChatClient<HttpChatApi>) {
    let wait = async {
        while !app.presence.is_online(client.me().id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait).await.expect("client never connected");
}

#[tokio::test]
async fn test_viewing_recipient_marks_seen_and_sender_updates() {
    let app = TestApp::spawn().await;
    let (alice, alice_push) = signed_in(&app, "alice").await;
    let (bob, bob_push) = signed_in(&app, "bob").await;

    let _alice_sub = alice.subscribe(alice_push, |_, _| {}, |_| {});
    let _bob_sub = bob.subscribe(bob_push, |_, _| {}, |_| {});
    wait_online(&app, &alice).await;
    wait_online(&app, &bob).await;

    alice.open_conversation(bob.me().clone()).await.unwrap();
    bob.open_conversation(alice.me().clone()).await.unwrap();

    let sent = alice.send(bob.me().id, MessageDraft::text("hi bob")).await.unwrap();
    assert_eq!(sent.status, MessageStatus::Delivered);
    let sent_id = sent.id;

    eventually(&bob, |s| async move { s.messages().iter().any(|m| m.id == sent_id) }).await;
    eventually(&alice, |s| async move {
        s.messages().iter().any(|m| m.id == sent_id && m.status == MessageStatus::Seen)
    })
    .await;

    assert!(bob.snapshot().await.notifications().is_empty());
}

#[tokio::test]
async fn test_notifications_then_open_clears_and_fetches() {
    let app = TestApp::spawn().await;
    let (alice, _) = signed_in(&app, "alice").await;
    let (bob, bob_push) = signed_in(&app, "bob").await;
    let (carol, _) = signed_in(&app, "carol").await;

    let _sub = bob.subscribe(bob_push, |_, _| {}, |_| {});
    wait_online(&app, &bob).await;
    bob.open_conversation(carol.me().clone()).await.unwrap();

    let first = alice.send(bob.me().id, MessageDraft::text("one")).await.unwrap();
    let second = alice.send(bob.me().id, MessageDraft::text("two")).await.unwrap();

    let alice_id = alice.me().id;
    eventually(&bob, |s| async move { s.unread_count(alice_id) == 2 }).await;
    assert!(bob.snapshot().await.messages().is_empty());

    bob.open_conversation(alice.me().clone()).await.unwrap();

    let state = bob.snapshot().await;
    assert_eq!(state.unread_count(alice_id), 0);
    let ids: Vec<_> = state.messages().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert!(state.messages().iter().all(|m| m.status == MessageStatus::Seen));
}

#[tokio::test]
async fn test_offline_recipient_reads_by_pull() {
    let app = TestApp::spawn().await;
    let (alice, _) = signed_in(&app, "alice").await;
    let (bob, _) = signed_in(&app, "bob").await;

    let sent = alice.send(bob.me().id, MessageDraft::text("see you later")).await.unwrap();
    assert_eq!(sent.status, MessageStatus::Sent);

    let peers = bob.load_peers().await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].id, alice.me().id);

    bob.open_conversation(alice.me().clone()).await.unwrap();
    assert_eq!(bob.snapshot().await.messages()[0].status, MessageStatus::Seen);

    alice.open_conversation(bob.me().clone()).await.unwrap();
    assert_eq!(alice.snapshot().await.messages()[0].status, MessageStatus::Seen);
}

#[tokio::test]
async fn test_rejected_send_becomes_notice() {
    let app = TestApp::spawn().await;
    let (alice, _) = signed_in(&app, "alice").await;
    let (bob, _) = signed_in(&app, "bob").await;

    assert!(alice.send(bob.me().id, MessageDraft::text("   ")).await.is_err());

    let notices = alice.take_notices().await;
    assert_eq!(notices.len(), 1);
    assert!(notices[0].contains("400"));
}
