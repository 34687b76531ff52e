//! Session error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    /// Transport could not be opened.
    #[error("Failed to open transport: {0}")]
    ConnectionFailed(String),

    /// Frame was not valid JSON or lacked a message type.
    #[error("Malformed frame: {0}")]
    ParseError(String),

    #[error("Session already stopped")]
    Shutdown,

    #[error("WebSocket protocol error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type WsResult<T> = Result<T, WsError>;
