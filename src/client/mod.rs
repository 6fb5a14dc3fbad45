//! Client side of the chat: REST transport, push channel and the conversation
//! state they keep in sync.

pub mod push;
pub mod state;
pub mod sync;
pub mod transport;

pub use push::{PushChannel, PushSignal, Subscription};
pub use state::{ConversationState, Notification};
pub use sync::ChatClient;
pub use transport::{ChatTransport, HttpChatApi};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("Failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
