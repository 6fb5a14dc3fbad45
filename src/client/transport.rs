use crate::client::{ClientError, ClientResult};
use crate::domain::auth_session::AuthSession;
use crate::domain::message::{Message, MessageDraft};
use crate::domain::user::UserProfile;
use async_trait::async_trait;
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

/// Request/response calls a chat client makes on behalf of its signed-in user.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn list_peers(&self) -> ClientResult<Vec<UserProfile>>;

    async fn fetch_conversation(&self, peer_id: Uuid) -> ClientResult<Vec<Message>>;

    async fn send_message(&self, peer_id: Uuid, draft: &MessageDraft) -> ClientResult<Message>;

    async fn mark_seen(&self, peer_id: Uuid) -> ClientResult<()>;
}

/// [`ChatTransport`] over the server's REST API.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl HttpChatApi {
    /// # Errors
    /// Returns `ClientError::InvalidUrl` if `base_url` cannot be parsed.
    pub fn new(base_url: &str, token: impl Into<String>) -> ClientResult<Self> {
        Ok(Self { http: reqwest::Client::new(), base_url: parse_base(base_url)?, token: token.into() })
    }

    /// Creates an account and returns a transport authenticated as it.
    ///
    /// # Errors
    /// Returns `ClientError::Rejected` if the server refuses the credentials.
    pub async fn signup(base_url: &str, username: &str, password: &str) -> ClientResult<(Self, UserProfile)> {
        Self::authenticate(base_url, "api/auth/signup", username, password).await
    }

    /// # Errors
    /// Returns `ClientError::Rejected` if the credentials are wrong.
    pub async fn login(base_url: &str, username: &str, password: &str) -> ClientResult<(Self, UserProfile)> {
        Self::authenticate(base_url, "api/auth/login", username, password).await
    }

    async fn authenticate(
        base_url: &str,
        path: &str,
        username: &str,
        password: &str,
    ) -> ClientResult<(Self, UserProfile)> {
        let base = parse_base(base_url)?;
        let http = reqwest::Client::new();
        let url = join(&base, path)?;

        let resp = http.post(url).json(&json!({ "username": username, "password": password })).send().await?;
        let session: AuthSession = decode(resp).await?;

        Ok((Self { http, base_url: base, token: session.token }, session.user))
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The push channel address for this user, e.g. `ws://host/api/gateway?token=...`.
    ///
    /// # Errors
    /// Returns `ClientError::InvalidUrl` if the base URL has no WebSocket equivalent.
    pub fn gateway_url(&self) -> ClientResult<Url> {
        let mut url = join(&self.base_url, "api/gateway")?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(ClientError::InvalidUrl(format!("unsupported scheme {other}"))),
        };
        url.set_scheme(scheme).map_err(|()| ClientError::InvalidUrl(url.to_string()))?;
        url.query_pairs_mut().append_pair("token", &self.token);
        Ok(url)
    }

    /// # Errors
    /// Returns `ClientError::Rejected` if the token is no longer accepted.
    pub async fn check(&self) -> ClientResult<UserProfile> {
        let resp = self.http.get(join(&self.base_url, "api/auth/check")?).bearer_auth(&self.token).send().await?;
        decode(resp).await
    }
}

#[async_trait]
impl ChatTransport for HttpChatApi {
    async fn list_peers(&self) -> ClientResult<Vec<UserProfile>> {
        let resp = self.http.get(join(&self.base_url, "api/messages/users")?).bearer_auth(&self.token).send().await?;
        decode(resp).await
    }

    async fn fetch_conversation(&self, peer_id: Uuid) -> ClientResult<Vec<Message>> {
        let url = join(&self.base_url, &format!("api/messages/{peer_id}"))?;
        let resp = self.http.get(url).bearer_auth(&self.token).send().await?;
        decode(resp).await
    }

    async fn send_message(&self, peer_id: Uuid, draft: &MessageDraft) -> ClientResult<Message> {
        let url = join(&self.base_url, &format!("api/messages/send/{peer_id}"))?;
        let body = json!({ "text": draft.body, "image": draft.attachment });
        let resp = self.http.post(url).bearer_auth(&self.token).json(&body).send().await?;
        decode(resp).await
    }

    async fn mark_seen(&self, peer_id: Uuid) -> ClientResult<()> {
        let url = join(&self.base_url, &format!("api/messages/seen/{peer_id}"))?;
        let resp = self.http.post(url).bearer_auth(&self.token).send().await?;
        ensure_success(resp).await?;
        Ok(())
    }
}

fn parse_base(base_url: &str) -> ClientResult<Url> {
    // A trailing slash makes `join` append instead of replacing the last segment.
    let normalized = if base_url.ends_with('/') { base_url.to_string() } else { format!("{base_url}/") };
    Url::parse(&normalized).map_err(|e| ClientError::InvalidUrl(e.to_string()))
}

fn join(base: &Url, path: &str) -> ClientResult<Url> {
    base.join(path).map_err(|e| ClientError::InvalidUrl(e.to_string()))
}

async fn ensure_success(resp: Response) -> ClientResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(ToString::to_string))
        .unwrap_or(body);

    Err(ClientError::Rejected { status: status.as_u16(), message })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> ClientResult<T> {
    let resp = ensure_success(resp).await?;
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
