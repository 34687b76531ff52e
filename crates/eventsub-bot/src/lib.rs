//! EventSub session service.
//!
//! Orchestrates:
//! - The persistent EventSub WebSocket session
//! - Conduit shard registration on every session change
//! - Bounded-concurrency notification dispatch
//! - Periodic session metrics

pub mod app;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod registrar;

pub use app::Application;
pub use config::AppConfig;
pub use dispatch::{Dispatcher, LoggingHandler, NotificationHandler};
pub use error::{AppError, AppResult, RegistrarError, RegistrarResult};
pub use registrar::ConduitRegistrar;
