//! Hub transport errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Invalid hub URL: {0}")]
    InvalidUrl(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invocation failed: {0}")]
    Invocation(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type HubResult<T> = Result<T, HubError>;
