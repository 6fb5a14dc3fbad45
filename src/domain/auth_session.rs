use crate::domain::user::UserProfile;
use serde::{Deserialize, Serialize};

/// Issued on signup and login. The token authenticates REST calls and the gateway handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user: UserProfile,
}
