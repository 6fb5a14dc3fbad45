pub mod auth_service;
pub mod gateway;
pub mod health_service;
pub mod message_service;
pub mod presence;
pub mod rate_limit_service;
pub mod receipt_service;
