//! Session state machine.
//!
//! Owns the session identity, the recorded reconnect target and the
//! keepalive monitor. Frame handling, keepalive checks and close handling
//! are plain synchronous transitions; the connection loop performs the
//! resulting I/O. All mutation happens on that loop's single timeline.

use crate::connection::ConnectionConfig;
use crate::keepalive::{accepted_interval, KeepaliveMonitor, KeepaliveVerdict};
use crate::message::{Frame, MessageType, RevocationReason};
use crate::reconnect::{CloseEvent, ReconnectDecision, ReconnectSupervisor, ReconnectTarget};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Established,
    /// Reconnect requested; the transport closes once the grace period ends.
    Draining,
    /// Terminal.
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Established => "established",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

/// Identity assigned by the remote on welcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    /// Reconnect URL carried by the welcome, if any.
    pub reconnect_url: Option<String>,
    pub keepalive_interval: Option<Duration>,
    /// Remote-reported connection time.
    pub connected_at: Option<DateTime<Utc>>,
    /// Local wall-clock time the welcome was processed.
    pub established_at: DateTime<Utc>,
}

/// Side effect requested by a frame.
#[derive(Debug, Clone)]
pub enum SessionAction {
    /// Publish a new session id to the subscription-management service.
    RegisterSession(String),
    /// Hand a notification envelope to the downstream consumer.
    Forward(Frame),
}

/// EventSub session state machine.
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    session: Option<Session>,
    reconnect_target: Option<String>,
    keepalive: KeepaliveMonitor,
    supervisor: ReconnectSupervisor,
    grace: Duration,
    grace_deadline: Option<Instant>,
}

impl SessionMachine {
    pub fn new(config: &ConnectionConfig, now: Instant) -> Self {
        Self {
            state: SessionState::Disconnected,
            session: None,
            reconnect_target: None,
            keepalive: KeepaliveMonitor::new(
                Duration::from_secs(config.default_keepalive_secs),
                Duration::from_millis(config.keepalive_buffer_ms),
                config.max_missed_keepalives,
                now,
            ),
            supervisor: ReconnectSupervisor::new(Duration::from_millis(config.reconnect_delay_ms)),
            grace: Duration::from_millis(config.reconnect_grace_ms),
            grace_deadline: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn reconnect_target(&self) -> Option<&str> {
        self.reconnect_target.as_deref()
    }

    pub fn keepalive(&self) -> &KeepaliveMonitor {
        &self.keepalive
    }

    pub fn keepalive_deadline(&self) -> Option<Instant> {
        self.keepalive.deadline()
    }

    pub fn grace_deadline(&self) -> Option<Instant> {
        self.grace_deadline
    }

    /// A transport is being opened.
    pub fn begin_connect(&mut self) {
        self.state = SessionState::Connecting;
    }

    /// A transport was opened; wait for the welcome frame.
    pub fn on_transport_open(&mut self, now: Instant) {
        self.keepalive.reset(now);
        self.grace_deadline = None;
        self.state = SessionState::Connecting;
    }

    /// Classify and apply one frame.
    pub fn on_frame(&mut self, frame: Frame, now: Instant) -> Option<SessionAction> {
        match frame.message_type() {
            MessageType::SessionWelcome => self.on_welcome(&frame, now),
            MessageType::SessionKeepalive => {
                self.on_keepalive(&frame, now);
                None
            }
            MessageType::Notification => Some(SessionAction::Forward(frame)),
            MessageType::SessionReconnect => {
                self.on_reconnect_request(&frame, now);
                None
            }
            MessageType::Revocation => {
                Self::on_revocation(&frame);
                None
            }
            MessageType::Unknown => {
                debug!(message_id = ?frame.metadata.message_id, "Ignoring unknown message type");
                None
            }
        }
    }

    fn on_welcome(&mut self, frame: &Frame, now: Instant) -> Option<SessionAction> {
        let payload = frame.session().cloned().unwrap_or_default();

        self.reconnect_target = payload.reconnect_url.clone();
        self.keepalive.touch(now);

        let interval = Self::remote_interval(payload.keepalive_timeout_seconds);
        if let Some(interval) = interval {
            self.keepalive.arm(interval, now);
        }

        let Some(id) = payload.id else {
            warn!("Welcome frame without session id");
            self.session = None;
            if self.state == SessionState::Established {
                self.state = SessionState::Connecting;
            }
            return None;
        };

        if self.grace_deadline.is_none() {
            self.state = SessionState::Established;
        }

        info!(
            session_id = %id,
            keepalive_secs = ?interval.map(|i| i.as_secs()),
            "Session established"
        );

        self.session = Some(Session {
            id: id.clone(),
            reconnect_url: payload.reconnect_url,
            keepalive_interval: interval,
            connected_at: payload.connected_at,
            established_at: Utc::now(),
        });

        Some(SessionAction::RegisterSession(id))
    }

    fn on_keepalive(&mut self, frame: &Frame, now: Instant) {
        self.keepalive.record_keepalive(now);

        let updated =
            Self::remote_interval(frame.session().and_then(|s| s.keepalive_timeout_seconds));

        if let Some(interval) = updated {
            if interval != self.keepalive.interval() || !self.keepalive.is_armed() {
                debug!(interval_secs = interval.as_secs(), "Keepalive interval updated");
                self.keepalive.arm(interval, now);
            }
            if let Some(session) = self.session.as_mut() {
                session.keepalive_interval = Some(interval);
            }
        }
    }

    /// Remote-assigned interval, if present and usable.
    fn remote_interval(secs: Option<u64>) -> Option<Duration> {
        let secs = secs?;
        let interval = accepted_interval(secs);
        if interval.is_none() {
            warn!(keepalive_secs = secs, "Ignoring out-of-range keepalive interval");
        }
        interval
    }

    fn on_reconnect_request(&mut self, frame: &Frame, now: Instant) {
        let Some(url) = frame.session().and_then(|s| s.reconnect_url.clone()) else {
            error!(
                session_id = ?self.session_id(),
                "Reconnect requested without reconnect URL, keeping current connection"
            );
            return;
        };

        info!(url = %url, grace_ms = self.grace.as_millis() as u64, "Session reconnect requested");
        self.reconnect_target = Some(url);

        // A repeated request keeps the original deadline.
        if self.grace_deadline.is_none() {
            self.grace_deadline = Some(now + self.grace);
        }
        self.state = SessionState::Draining;
    }

    fn on_revocation(frame: &Frame) {
        let subscription = frame.payload.subscription.as_ref();
        let reason = RevocationReason::from_status(subscription.and_then(|s| s.status.as_deref()));
        warn!(
            subscription_id = ?subscription.and_then(|s| s.id.as_deref()),
            subscription_type = ?frame.subscription_type(),
            reason = reason.description(),
            "Subscription revoked"
        );
    }

    /// Run the scheduled keepalive check.
    ///
    /// Returns the synthetic close to apply when the missed count is exhausted.
    pub fn on_keepalive_check(&mut self, now: Instant) -> Option<CloseEvent> {
        match self.keepalive.check(now) {
            KeepaliveVerdict::Healthy => None,
            KeepaliveVerdict::Missed(missed) => {
                warn!(missed, max = self.keepalive.max_missed(), "Keepalive missed");
                None
            }
            KeepaliveVerdict::Exhausted => {
                let missed = self.keepalive.missed();
                error!(missed, "Keepalive exhausted, forcing transport close");
                Some(CloseEvent::keepalive_exhausted(missed))
            }
        }
    }

    /// The reconnect grace period ended; the transport is closed locally.
    pub fn on_grace_elapsed(&mut self) -> CloseEvent {
        self.grace_deadline = None;
        CloseEvent::grace_elapsed()
    }

    /// Apply a transport close and decide what happens next.
    pub fn on_close(&mut self, event: &CloseEvent) -> ReconnectDecision {
        self.keepalive.disarm();
        self.grace_deadline = None;

        let decision = self
            .supervisor
            .decide(event.code, self.reconnect_target.as_deref());

        warn!(
            code = event.code.as_u16(),
            reason = event.code.reason(),
            detail = %event.detail,
            graceful = event.graceful,
            local = event.local,
            "Transport closed"
        );

        if event.code.requires_resubscribe() {
            warn!("Remote dropped unused connection, subscriptions must be re-established");
        }

        match &decision {
            ReconnectDecision::Reconnect {
                target: ReconnectTarget::Default,
                ..
            } => {
                self.session = None;
                self.reconnect_target = None;
                self.state = SessionState::Disconnected;
            }
            ReconnectDecision::Reconnect { .. } | ReconnectDecision::Idle => {
                self.state = SessionState::Disconnected;
            }
            ReconnectDecision::GiveUp => {
                self.state = SessionState::Closed;
            }
        }

        decision
    }

    /// Explicit shutdown. Idempotent.
    pub fn stop(&mut self) {
        self.keepalive.disarm();
        self.grace_deadline = None;
        self.state = SessionState::Closed;
    }
}
