//! Notification dispatch.
//!
//! Drains the session's notification channel and hands every envelope to a
//! [`NotificationHandler`] in its own task, with at most `max_in_flight`
//! handlers running at once. Handler failures are logged and never reach
//! the session.

use eventsub_telemetry::Metrics;
use eventsub_ws::Frame;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Downstream consumer of notification envelopes.
pub trait NotificationHandler: Send + Sync + 'static {
    type Error: Display + Send;

    fn handle(&self, frame: Frame) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Default handler: logs the subscription type and event body.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl NotificationHandler for LoggingHandler {
    type Error = std::convert::Infallible;

    async fn handle(&self, frame: Frame) -> Result<(), Self::Error> {
        info!(
            message_id = ?frame.metadata.message_id,
            subscription_type = frame.subscription_type().unwrap_or("unknown"),
            subscription_version = ?frame.metadata.subscription_version,
            event = ?frame.payload.event,
            "Notification received"
        );
        Ok(())
    }
}

/// Totals reported when the dispatcher finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub failed: u64,
}

/// Bounded-concurrency notification dispatcher.
pub struct Dispatcher<H: NotificationHandler> {
    handler: Arc<H>,
    permits: Arc<Semaphore>,
}

impl<H: NotificationHandler> Dispatcher<H> {
    pub fn new(handler: H, max_in_flight: usize) -> Self {
        Self {
            handler: Arc::new(handler),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Dispatch until the channel closes, then wait for in-flight handlers.
    pub async fn run(self, mut rx: mpsc::Receiver<Frame>) -> DispatchStats {
        let mut tasks: JoinSet<bool> = JoinSet::new();
        let mut stats = DispatchStats::default();

        while let Some(frame) = rx.recv().await {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };

            while let Some(joined) = tasks.try_join_next() {
                Self::record(&mut stats, joined);
            }

            let subscription_type = frame.subscription_type().unwrap_or("unknown").to_string();
            Metrics::notification_dispatched(&subscription_type);

            let handler = Arc::clone(&self.handler);
            tasks.spawn(async move {
                let _permit = permit;
                let message_id = frame.metadata.message_id.clone();
                match handler.handle(frame).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!(
                            message_id = ?message_id,
                            subscription_type = %subscription_type,
                            error = %e,
                            "Notification handler failed"
                        );
                        false
                    }
                }
            });
        }

        debug!(in_flight = tasks.len(), "Notification channel closed, draining handlers");
        while let Some(joined) = tasks.join_next().await {
            Self::record(&mut stats, joined);
        }

        info!(
            dispatched = stats.dispatched,
            failed = stats.failed,
            "Notification dispatcher stopped"
        );
        stats
    }

    fn record(stats: &mut DispatchStats, joined: Result<bool, tokio::task::JoinError>) {
        stats.dispatched += 1;
        match joined {
            Ok(true) => {}
            Ok(false) => stats.failed += 1,
            Err(e) => {
                error!(error = %e, "Notification handler task aborted");
                stats.failed += 1;
            }
        }
    }
}
