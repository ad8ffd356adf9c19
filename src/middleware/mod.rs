pub mod auth;
pub mod idempotency;
pub mod request_logger;
