//! Bot error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("REST call failed: {0}")]
    Rest(String),

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Engine error: {0}")]
    Gtp(#[from] gtp_bridge::GtpError),
}
