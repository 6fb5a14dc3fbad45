use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct User {
    pub(crate) id: Uuid,
    pub(crate) username: String,
    pub(crate) password_hash: String,
    #[allow(dead_code)]
    pub(crate) created_at: OffsetDateTime,
}

impl User {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn profile(&self) -> UserProfile {
        UserProfile { id: self.id, username: self.username.clone() }
    }
}

/// Public view of a user, as shown to peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
}
