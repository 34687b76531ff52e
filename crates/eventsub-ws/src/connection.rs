//! EventSub connection manager.
//!
//! Runs one persistent event-processing loop per session. Frames, keepalive
//! checks, the reconnect grace period and the reconnect delay are all
//! serialized through that loop, which is re-attached to a fresh transport on
//! every reconnect.

use crate::error::{WsError, WsResult};
use crate::keepalive::{DEFAULT_KEEPALIVE_INTERVAL, KEEPALIVE_JITTER_BUFFER, MAX_MISSED_KEEPALIVES};
use crate::message::Frame;
use crate::reconnect::{CloseCode, CloseEvent, ReconnectDecision, ReconnectTarget, RECONNECT_DELAY};
use crate::registrar::SessionRegistrar;
use crate::session::{SessionAction, SessionMachine, SessionState};
use crate::transport::{Connector, Transport, TransportEvent};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default EventSub WebSocket endpoint.
pub const DEFAULT_EVENTSUB_URL: &str = "wss://eventsub.wss.twitch.tv/ws";

/// Grace period between a reconnect request and the local close.
pub const RECONNECT_GRACE: Duration = Duration::from_secs(5);

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Default WebSocket endpoint.
    pub url: String,
    /// Fixed delay before every reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Grace period before closing after a reconnect request.
    pub reconnect_grace_ms: u64,
    /// Jitter allowance added to every keepalive window.
    pub keepalive_buffer_ms: u64,
    /// Missed keepalive checks before the transport is force-closed.
    pub max_missed_keepalives: u32,
    /// Keepalive interval assumed until a welcome assigns one.
    pub default_keepalive_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_EVENTSUB_URL.to_string(),
            reconnect_delay_ms: RECONNECT_DELAY.as_millis() as u64,
            reconnect_grace_ms: RECONNECT_GRACE.as_millis() as u64,
            keepalive_buffer_ms: KEEPALIVE_JITTER_BUFFER.as_millis() as u64,
            max_missed_keepalives: MAX_MISSED_KEEPALIVES,
            default_keepalive_secs: DEFAULT_KEEPALIVE_INTERVAL.as_secs(),
        }
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    pub session_id: Option<String>,
    pub reconnect_target: Option<String>,
    pub keepalive_interval: Duration,
    pub missed_keepalives: u32,
    /// Reconnect attempts since start.
    pub reconnect_count: u64,
    /// Reconnect attempts that followed a server-provided URL.
    pub redirect_reconnects: u64,
    pub frames_received: u64,
    /// Notifications the downstream channel could not accept.
    pub notifications_dropped: u64,
    pub established_at: Option<DateTime<Utc>>,
}

impl SessionStatus {
    fn initial(config: &ConnectionConfig) -> Self {
        Self {
            state: SessionState::Disconnected,
            session_id: None,
            reconnect_target: None,
            keepalive_interval: Duration::from_secs(config.default_keepalive_secs),
            missed_keepalives: 0,
            reconnect_count: 0,
            redirect_reconnects: 0,
            frames_received: 0,
            notifications_dropped: 0,
            established_at: None,
        }
    }
}

/// Cloneable handle for observing and stopping a session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    status: Arc<RwLock<SessionStatus>>,
    shutdown_token: CancellationToken,
    finished_token: CancellationToken,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        self.status.read().state
    }

    pub fn session_id(&self) -> Option<String> {
        self.status.read().session_id.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }

    /// Stop the session: cancels pending timers, closes the transport and
    /// moves to `Closed`. Safe to call from any state, any number of times.
    pub fn stop(&self) {
        if !self.shutdown_token.is_cancelled() {
            info!("Session stop requested");
        }
        self.shutdown_token.cancel();
        if self.finished_token.is_cancelled() {
            self.status.write().state = SessionState::Closed;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Wait until the event loop has exited.
    pub async fn stopped(&self) {
        self.finished_token.cancelled().await;
    }
}

/// EventSub connection manager.
pub struct ConnectionManager<C: Connector, R: SessionRegistrar> {
    config: ConnectionConfig,
    connector: C,
    registrar: Arc<R>,
    notification_tx: mpsc::Sender<Frame>,
    status: Arc<RwLock<SessionStatus>>,
    shutdown_token: CancellationToken,
    finished_token: CancellationToken,
}

impl<C: Connector, R: SessionRegistrar> ConnectionManager<C, R> {
    /// Create a new connection manager.
    pub fn new(
        config: ConnectionConfig,
        connector: C,
        registrar: Arc<R>,
        notification_tx: mpsc::Sender<Frame>,
    ) -> Self {
        let status = Arc::new(RwLock::new(SessionStatus::initial(&config)));
        Self {
            config,
            connector,
            registrar,
            notification_tx,
            status,
            shutdown_token: CancellationToken::new(),
            finished_token: CancellationToken::new(),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            status: self.status.clone(),
            shutdown_token: self.shutdown_token.clone(),
            finished_token: self.finished_token.clone(),
        }
    }

    /// Open the default endpoint and spawn the event loop.
    ///
    /// A failure to open the first transport is returned here; every later
    /// failure is logged and handled by the reconnect policy.
    pub async fn start(self) -> WsResult<SessionHandle> {
        let handle = self.handle();

        if self.shutdown_token.is_cancelled() {
            self.status.write().state = SessionState::Closed;
            self.finished_token.cancel();
            return Err(WsError::Shutdown);
        }

        self.status.write().state = SessionState::Connecting;

        let transport = match self.connector.open(&self.config.url).await {
            Ok(transport) => transport,
            Err(e) => {
                error!(url = %self.config.url, error = %e, "Initial connection failed");
                self.status.write().state = SessionState::Disconnected;
                self.finished_token.cancel();
                return Err(e);
            }
        };

        let driver = SessionDriver {
            machine: SessionMachine::new(&self.config, Instant::now()),
            config: self.config,
            connector: self.connector,
            registrar: self.registrar,
            notification_tx: self.notification_tx,
            status: self.status,
            shutdown_token: self.shutdown_token,
            finished_token: self.finished_token,
            reconnect_count: 0,
            redirect_reconnects: 0,
            frames_received: 0,
            notifications_dropped: 0,
        };
        tokio::spawn(driver.run(transport));

        Ok(handle)
    }
}

/// Why the per-transport loop returned.
enum LoopExit {
    Shutdown,
    Closed(CloseEvent),
}

enum Step {
    Shutdown,
    Transport(TransportEvent),
    GraceElapsed,
    KeepaliveCheck,
}

/// Owns all session state for the lifetime of the event loop.
struct SessionDriver<C: Connector, R: SessionRegistrar> {
    config: ConnectionConfig,
    connector: C,
    registrar: Arc<R>,
    notification_tx: mpsc::Sender<Frame>,
    status: Arc<RwLock<SessionStatus>>,
    shutdown_token: CancellationToken,
    finished_token: CancellationToken,
    machine: SessionMachine,
    reconnect_count: u64,
    redirect_reconnects: u64,
    frames_received: u64,
    notifications_dropped: u64,
}

impl<C: Connector, R: SessionRegistrar> SessionDriver<C, R> {
    async fn run(mut self, mut transport: C::Transport) {
        self.machine.on_transport_open(Instant::now());
        self.publish();

        loop {
            let mut close = match self.drive(&mut transport).await {
                LoopExit::Shutdown => {
                    if let Err(e) = transport.close(CloseCode::Normal).await {
                        debug!(error = %e, "Close during shutdown failed");
                    }
                    break;
                }
                LoopExit::Closed(close) => close,
            };
            drop(transport);

            transport = loop {
                let (target, delay) = match self.machine.on_close(&close) {
                    ReconnectDecision::Reconnect { target, delay } => (target, delay),
                    ReconnectDecision::GiveUp => {
                        error!(code = close.code.as_u16(), "Close code is terminal, not reconnecting");
                        self.finish();
                        return;
                    }
                    ReconnectDecision::Idle => {
                        info!("No reconnect target recorded, idle until stopped");
                        self.publish();
                        self.shutdown_token.cancelled().await;
                        self.finish();
                        return;
                    }
                };
                self.publish();

                warn!(
                    reconnect_to = target.kind(),
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting"
                );
                let cancelled = tokio::select! {
                    () = tokio::time::sleep(delay) => false,
                    () = self.shutdown_token.cancelled() => true,
                };
                if cancelled {
                    info!("Shutdown requested during reconnect delay");
                    self.finish();
                    return;
                }

                let url = match &target {
                    ReconnectTarget::Default => self.config.url.clone(),
                    ReconnectTarget::Redirect(url) => {
                        self.redirect_reconnects += 1;
                        url.clone()
                    }
                };
                self.machine.begin_connect();
                self.reconnect_count += 1;
                self.publish();

                let opened = tokio::select! {
                    result = self.connector.open(&url) => Some(result),
                    () = self.shutdown_token.cancelled() => None,
                };
                match opened {
                    Some(Ok(transport)) => break transport,
                    Some(Err(e)) => {
                        warn!(url = %url, error = %e, "Reconnect attempt failed");
                        close = CloseEvent::open_failed(
                            matches!(target, ReconnectTarget::Redirect(_)),
                            e.to_string(),
                        );
                    }
                    None => {
                        info!("Shutdown requested while connecting");
                        self.finish();
                        return;
                    }
                }
            };

            self.machine.on_transport_open(Instant::now());
            self.publish();
        }

        self.finish();
    }

    /// Process one transport until it closes or shutdown is requested.
    async fn drive(&mut self, transport: &mut C::Transport) -> LoopExit {
        loop {
            let keepalive_deadline = self.machine.keepalive_deadline();
            let grace_deadline = self.machine.grace_deadline();

            let step = tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => Step::Shutdown,
                // Deadlines win over queued frames.
                () = sleep_until(grace_deadline) => Step::GraceElapsed,
                () = sleep_until(keepalive_deadline) => Step::KeepaliveCheck,
                event = transport.next_event() => Step::Transport(event),
            };

            match step {
                Step::Shutdown => return LoopExit::Shutdown,
                Step::Transport(TransportEvent::Text(text)) => self.handle_text(&text),
                Step::Transport(TransportEvent::Closed(close)) => return LoopExit::Closed(close),
                Step::GraceElapsed => {
                    let close = self.machine.on_grace_elapsed();
                    info!("Reconnect grace period elapsed, closing transport");
                    Self::close_transport(transport).await;
                    return LoopExit::Closed(close);
                }
                Step::KeepaliveCheck => {
                    if let Some(close) = self.machine.on_keepalive_check(Instant::now()) {
                        Self::close_transport(transport).await;
                        return LoopExit::Closed(close);
                    }
                }
            }

            self.publish();
        }
    }

    fn handle_text(&mut self, text: &str) {
        self.frames_received += 1;

        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Discarding malformed frame");
                return;
            }
        };
        debug!(message_type = frame.message_type().as_str(), "Frame received");

        match self.machine.on_frame(frame, Instant::now()) {
            Some(SessionAction::RegisterSession(session_id)) => self.register_session(session_id),
            Some(SessionAction::Forward(frame)) => self.forward(frame),
            None => {}
        }
    }

    /// Best-effort, off the frame-processing timeline.
    fn register_session(&self, session_id: String) {
        let registrar = Arc::clone(&self.registrar);
        tokio::spawn(async move {
            match registrar.session_changed(&session_id).await {
                Ok(()) => info!(session_id = %session_id, "Session registered"),
                Err(e) => error!(session_id = %session_id, error = %e, "Failed to register session"),
            }
        });
    }

    /// At most one delivery attempt; never waits on the consumer.
    fn forward(&mut self, frame: Frame) {
        match self.notification_tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                self.notifications_dropped += 1;
                warn!(
                    message_id = ?frame.metadata.message_id,
                    "Notification channel full, dropping notification"
                );
            }
            Err(TrySendError::Closed(_)) => {
                self.notifications_dropped += 1;
                warn!("Notification receiver dropped");
            }
        }
    }

    async fn close_transport(transport: &mut C::Transport) {
        if let Err(e) = transport.close(CloseCode::Normal).await {
            debug!(error = %e, "Transport close failed");
        }
    }

    fn publish(&self) {
        let keepalive = self.machine.keepalive();
        let session = self.machine.session();
        let mut status = self.status.write();
        status.state = self.machine.state();
        status.session_id = session.map(|s| s.id.clone());
        status.reconnect_target = self.machine.reconnect_target().map(str::to_string);
        status.keepalive_interval = keepalive.interval();
        status.missed_keepalives = keepalive.missed();
        status.reconnect_count = self.reconnect_count;
        status.redirect_reconnects = self.redirect_reconnects;
        status.frames_received = self.frames_received;
        status.notifications_dropped = self.notifications_dropped;
        status.established_at = session.map(|s| s.established_at);
    }

    fn finish(&mut self) {
        self.machine.stop();
        self.publish();
        self.finished_token.cancel();
        info!("Session event loop stopped");
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.url, DEFAULT_EVENTSUB_URL);
        assert_eq!(config.reconnect_delay_ms, 5000);
        assert_eq!(config.reconnect_grace_ms, 5000);
        assert_eq!(config.keepalive_buffer_ms, 2000);
        assert_eq!(config.max_missed_keepalives, 10);
    }

    #[test]
    fn test_stop_before_start_closes() {
        let config = ConnectionConfig::default();
        let status = Arc::new(RwLock::new(SessionStatus::initial(&config)));
        let handle = SessionHandle {
            status,
            shutdown_token: CancellationToken::new(),
            finished_token: CancellationToken::new(),
        };
        assert_eq!(handle.state(), SessionState::Disconnected);
        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
        // Loop never ran, so nothing has finished yet.
        assert_eq!(handle.state(), SessionState::Disconnected);
    }
}
