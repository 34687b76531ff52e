//! Structured logging initialization.

use crate::error::{TelemetryError, TelemetryResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured logging.
///
/// `RUST_LOG` takes precedence; otherwise `level` applies globally with
/// debug output for the `eventsub` crates. `RUST_ENV=production` switches
/// to JSON output.
pub fn init_logging(level: &str) -> TelemetryResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(level)))
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    let is_production = std::env::var("RUST_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);

    let result = if is_production {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(true))
            .try_init()
    };

    result.map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

fn default_directives(level: &str) -> String {
    format!("{level},eventsub_ws=debug,eventsub_bot=debug")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse() {
        let directives = default_directives("info");
        assert_eq!(directives, "info,eventsub_ws=debug,eventsub_bot=debug");
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[test]
    fn test_init_twice_reports_error() {
        let _ = init_logging("warn");
        assert!(matches!(
            init_logging("warn"),
            Err(TelemetryError::LoggingInit(_))
        ));
    }
}
