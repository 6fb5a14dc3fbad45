pub mod auth;
pub mod auth_session;
pub mod event;
pub mod message;
pub mod user;
