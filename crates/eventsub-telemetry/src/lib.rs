//! Prometheus metrics and structured logging for the EventSub session manager.
//!
//! - Session connection state and reconnects
//! - Frame and keepalive counters
//! - Notification dispatch outcomes
//! - Structured JSON logging with tracing

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
