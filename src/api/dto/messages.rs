use crate::domain::message::MessageDraft;
use serde::Deserialize;

/// Body of a send request. At least one of the fields must carry content.
#[derive(Debug, Default, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl From<SendMessageRequest> for MessageDraft {
    fn from(req: SendMessageRequest) -> Self {
        Self { body: req.text, attachment: req.image }
    }
}
