//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] eventsub_ws::WsError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] eventsub_telemetry::TelemetryError),

    #[error("Registrar error: {0}")]
    Registrar(#[from] RegistrarError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;

/// Conduit shard registration errors.
#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(&'static str),

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

pub type RegistrarResult<T> = Result<T, RegistrarError>;
