#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::panic,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    missing_debug_implementations,
    unreachable_pub
)]

use futures::StreamExt;
use parley_server::AppBuilder;
use parley_server::api::{self, MgmtState};
use parley_server::config::Config;
use parley_server::domain::event::ServerEvent;
use parley_server::domain::message::Message;
use parley_server::services::presence::PresenceRegistry;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

static INIT: Once = Once::new();

pub fn setup_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "warn".into())
            .add_directive("parley_server=debug".parse().unwrap())
            .add_directive("tower=warn".parse().unwrap())
            .add_directive("hyper=warn".parse().unwrap())
            .add_directive("reqwest=warn".parse().unwrap())
            .add_directive("tungstenite=warn".parse().unwrap());

        tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().init();
    });
}

pub fn get_test_config() -> Config {
    let mut config = Config::default();
    config.auth.jwt_secret = "test_secret".to_string();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.server.mgmt_port = 0;
    config.rate_limit.per_second = 10_000;
    config.rate_limit.burst = 10_000;
    config.rate_limit.auth_per_second = 10_000;
    config.rate_limit.auth_burst = 10_000;
    config
}

pub struct TestUser {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

pub struct TestApp {
    pub server_url: String,
    pub ws_url: String,
    pub mgmt_url: String,
    pub client: reqwest::Client,
    pub config: Config,
    pub presence: PresenceRegistry,
    pub shutdown_tx: watch::Sender<bool>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_config(get_test_config()).await
    }

    pub async fn spawn_with_config(config: Config) -> Self {
        setup_tracing();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let app = AppBuilder::new(config.clone()).build();
        let presence = app.services.presence.clone();

        let router = api::app_router(config.clone(), app.services, shutdown_rx.clone());
        let mgmt = api::mgmt_router(MgmtState { health_service: app.health_service });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mgmt_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mgmt_addr = mgmt_listener.local_addr().unwrap();

        let mut api_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move {
                    let _ = api_rx.wait_for(|&s| s).await;
                })
                .await
                .unwrap();
        });

        let mut mgmt_rx = shutdown_rx;
        tokio::spawn(async move {
            axum::serve(mgmt_listener, mgmt.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move {
                    let _ = mgmt_rx.wait_for(|&s| s).await;
                })
                .await
                .unwrap();
        });

        Self {
            server_url: format!("http://{addr}"),
            ws_url: format!("ws://{addr}"),
            mgmt_url: format!("http://{mgmt_addr}"),
            client: reqwest::Client::new(),
            config,
            presence,
            shutdown_tx,
        }
    }

    pub async fn register_user(&self, username: &str) -> TestUser {
        let resp = self
            .client
            .post(format!("{}/api/auth/signup", self.server_url))
            .json(&json!({ "username": username, "password": "password123" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201, "signup failed for {username}");

        let body: serde_json::Value = resp.json().await.unwrap();
        TestUser {
            user_id: body["user"]["id"].as_str().unwrap().parse().unwrap(),
            username: username.to_string(),
            token: body["token"].as_str().unwrap().to_string(),
        }
    }

    pub async fn send_text(&self, token: &str, peer_id: Uuid, text: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/api/messages/send/{peer_id}", self.server_url))
            .bearer_auth(token)
            .json(&json!({ "text": text }))
            .send()
            .await
            .unwrap()
    }

    pub async fn send_message(&self, token: &str, peer_id: Uuid, text: &str) -> Message {
        let resp = self.send_text(token, peer_id, text).await;
        assert_eq!(resp.status(), 201);
        resp.json().await.unwrap()
    }

    pub async fn get_conversation(&self, token: &str, peer_id: Uuid) -> Vec<Message> {
        let resp = self
            .client
            .get(format!("{}/api/messages/{peer_id}", self.server_url))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        resp.json().await.unwrap()
    }

    pub async fn mark_seen(&self, token: &str, peer_id: Uuid) -> reqwest::StatusCode {
        self.client
            .post(format!("{}/api/messages/seen/{peer_id}", self.server_url))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
            .status()
    }

    /// Connects to the gateway and waits until the connection is registered.
    pub async fn connect_ws(&self, user: &TestUser) -> TestWsClient {
        let previous = self.presence.lookup(user.user_id).map(|h| h.connection_id());
        let url = format!("{}/api/gateway?token={}", self.ws_url, user.token);
        let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        let registered = async {
            loop {
                let current = self.presence.lookup(user.user_id).map(|h| h.connection_id());
                if current.is_some() && current != previous {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), registered).await.expect("connection was not registered");

        TestWsClient { stream }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

pub struct TestWsClient {
    pub stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

pub enum Received {
    Event(ServerEvent),
    Closed(Option<CloseFrame>),
}

impl TestWsClient {
    pub async fn receive_event(&mut self) -> Option<ServerEvent> {
        self.receive_event_timeout(Duration::from_secs(5)).await
    }

    pub async fn receive_event_timeout(&mut self, timeout: Duration) -> Option<ServerEvent> {
        match self.receive_timeout(timeout).await {
            Some(Received::Event(event)) => Some(event),
            _ => None,
        }
    }

    /// Waits for the server to close the socket and returns the close frame.
    pub async fn expect_close(&mut self) -> Option<CloseFrame> {
        loop {
            match self.receive_timeout(Duration::from_secs(5)).await {
                Some(Received::Event(_)) => {}
                Some(Received::Closed(frame)) => return frame,
                None => panic!("socket was not closed"),
            }
        }
    }

    async fn receive_timeout(&mut self, timeout: Duration) -> Option<Received> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let msg = tokio::time::timeout_at(deadline, self.stream.next()).await.ok()?;
            match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    return Some(Received::Event(serde_json::from_str(text.as_str()).unwrap()));
                }
                Some(Ok(WsMessage::Close(frame))) => return Some(Received::Closed(frame)),
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return Some(Received::Closed(None)),
            }
        }
    }
}
