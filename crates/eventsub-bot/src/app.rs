//! Main application orchestration.
//!
//! Coordinates:
//! - The EventSub session (connection manager over tokio-tungstenite)
//! - Conduit shard registration when a conduit is configured
//! - The notification dispatcher
//! - Periodic session metrics
//! - Graceful shutdown on Ctrl-C

use crate::config::AppConfig;
use crate::dispatch::{DispatchStats, Dispatcher, LoggingHandler, NotificationHandler};
use crate::error::{AppError, AppResult};
use crate::registrar::ConduitRegistrar;
use eventsub_telemetry::Metrics;
use eventsub_ws::{
    ConnectionManager, NoopRegistrar, SessionRegistrar, SessionState, SessionStatus,
    TungsteniteConnector,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Main application.
pub struct Application<H: NotificationHandler = LoggingHandler> {
    config: AppConfig,
    handler: H,
}

impl Application {
    /// Create an application with the logging notification handler.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        Self::with_handler(config, LoggingHandler)
    }
}

impl<H: NotificationHandler> Application<H> {
    pub fn with_handler(config: AppConfig, handler: H) -> AppResult<Self> {
        config.validate()?;
        Ok(Self { config, handler })
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> AppResult<()> {
        let stats = self
            .run_until(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
                info!("Shutdown signal received");
            })
            .await?;

        info!(
            dispatched = stats.dispatched,
            failed = stats.failed,
            "Application stopped"
        );
        Ok(())
    }

    /// Run until `shutdown` resolves or the session ends on its own.
    pub async fn run_until<F>(self, shutdown: F) -> AppResult<DispatchStats>
    where
        F: Future<Output = ()>,
    {
        if self.config.conduit.is_enabled() {
            let registrar = ConduitRegistrar::new(&self.config.conduit)?;
            info!(endpoint = registrar.endpoint(), "Conduit shard registration enabled");
            self.run_session(Arc::new(registrar), shutdown).await
        } else {
            warn!("No conduit configured, session changes will not be registered");
            self.run_session(Arc::new(NoopRegistrar), shutdown).await
        }
    }

    async fn run_session<R, F>(self, registrar: Arc<R>, shutdown: F) -> AppResult<DispatchStats>
    where
        R: SessionRegistrar,
        F: Future<Output = ()>,
    {
        let Self { config, handler } = self;

        let (notification_tx, notification_rx) =
            mpsc::channel(config.websocket.notification_buffer);
        let dispatcher = Dispatcher::new(handler, config.dispatch.max_in_flight);
        let dispatch_task = tokio::spawn(dispatcher.run(notification_rx));

        info!(url = %config.websocket.url, "Starting EventSub session");
        let manager = ConnectionManager::new(
            config.websocket.clone().into(),
            TungsteniteConnector,
            registrar,
            notification_tx,
        );
        let handle = manager.start().await?;

        let mut cursor = StatsCursor::default();
        let mut stats_interval = tokio::time::interval(Duration::from_secs(
            config.telemetry.stats_interval_secs.max(1),
        ));
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = stats_interval.tick() => {
                    let status = handle.status();
                    cursor.record(&status);
                    info!(
                        state = status.state.as_str(),
                        session_id = ?status.session_id,
                        missed_keepalives = status.missed_keepalives,
                        reconnects = status.reconnect_count,
                        frames = status.frames_received,
                        dropped = status.notifications_dropped,
                        "Session status"
                    );
                }
                () = handle.stopped() => {
                    warn!(state = handle.state().as_str(), "Session ended");
                    break;
                }
                () = &mut shutdown => {
                    break;
                }
            }
        }

        handle.stop();
        handle.stopped().await;
        cursor.record(&handle.status());

        // The session dropped its sender, so the dispatcher drains and exits.
        let stats = dispatch_task
            .await
            .map_err(|e| AppError::Io(std::io::Error::other(e)))?;
        Ok(stats)
    }
}

/// Turns cumulative session counters into metric increments.
#[derive(Debug, Default)]
struct StatsCursor {
    reconnects: u64,
    redirects: u64,
    frames: u64,
    dropped: u64,
}

impl StatsCursor {
    fn record(&mut self, status: &SessionStatus) {
        Metrics::ws_state_set(status.state.as_str());
        if matches!(status.state, SessionState::Established | SessionState::Draining) {
            Metrics::ws_connected();
        } else {
            Metrics::ws_disconnected();
        }
        Metrics::keepalive_missed(status.missed_keepalives);

        let redirects = status.redirect_reconnects.saturating_sub(self.redirects);
        let reconnects = status.reconnect_count.saturating_sub(self.reconnects);
        Metrics::ws_reconnect("redirect", redirects);
        Metrics::ws_reconnect("default", reconnects.saturating_sub(redirects));
        Metrics::frames_received(status.frames_received.saturating_sub(self.frames));
        Metrics::notifications_dropped(status.notifications_dropped.saturating_sub(self.dropped));

        self.reconnects = status.reconnect_count;
        self.redirects = status.redirect_reconnects;
        self.frames = status.frames_received;
        self.dropped = status.notifications_dropped;
    }
}
