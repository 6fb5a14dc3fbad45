pub mod message;
pub mod user;

pub(crate) use message::Message;
pub(crate) use user::{Profile, User};
