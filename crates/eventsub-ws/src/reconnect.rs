//! Reconnect policy.
//!
//! Decides, from the close code alone plus whether a reconnect target is
//! recorded, whether and where the transport is re-established. Every
//! reconnect uses the same fixed delay; there is no backoff growth.

use std::fmt;
use std::time::Duration;

/// Fixed delay before any reconnect attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Close codes understood by the session core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    InternalServerError,
    ClientSentInboundTraffic,
    FailedPingPong,
    ConnectionUnused,
    ReconnectGraceExpired,
    NetworkTimeout,
    NetworkError,
    InvalidReconnectUrl,
    Other(u16),
}

impl CloseCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::InternalServerError => 4000,
            Self::ClientSentInboundTraffic => 4001,
            Self::FailedPingPong => 4002,
            Self::ConnectionUnused => 4003,
            Self::ReconnectGraceExpired => 4004,
            Self::NetworkTimeout => 4005,
            Self::NetworkError => 4006,
            Self::InvalidReconnectUrl => 4007,
            Self::Other(code) => *code,
        }
    }

    /// Human-readable close reason.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Normal => "Normal closure",
            Self::InternalServerError => "Internal server error",
            Self::ClientSentInboundTraffic => "Client sent inbound traffic",
            Self::FailedPingPong => "Client failed ping-pong",
            Self::ConnectionUnused => "Connection unused",
            Self::ReconnectGraceExpired => "Reconnect grace time expired",
            Self::NetworkTimeout => "Network timeout",
            Self::NetworkError => "Network error",
            Self::InvalidReconnectUrl => "Invalid reconnect URL",
            Self::Other(_) => "Unknown close code",
        }
    }

    /// The remote dropped every subscription bound to the session.
    pub fn requires_resubscribe(&self) -> bool {
        matches!(self, Self::ConnectionUnused)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            4000 => Self::InternalServerError,
            4001 => Self::ClientSentInboundTraffic,
            4002 => Self::FailedPingPong,
            4003 => Self::ConnectionUnused,
            4004 => Self::ReconnectGraceExpired,
            4005 => Self::NetworkTimeout,
            4006 => Self::NetworkError,
            4007 => Self::InvalidReconnectUrl,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_u16(), self.reason())
    }
}

/// A transport close as seen by the session core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: CloseCode,
    /// Close handshake completed (as opposed to an abrupt drop).
    pub graceful: bool,
    /// Raised by this client rather than the remote.
    pub local: bool,
    /// Reason text from the close frame or transport error.
    pub detail: String,
}

impl CloseEvent {
    /// Close initiated by the remote.
    pub fn remote(code: u16, detail: impl Into<String>) -> Self {
        Self {
            code: CloseCode::from(code),
            graceful: true,
            local: false,
            detail: detail.into(),
        }
    }

    /// Transport dropped without a close handshake.
    pub fn abnormal(detail: impl Into<String>) -> Self {
        Self {
            code: CloseCode::Other(1006),
            graceful: false,
            local: false,
            detail: detail.into(),
        }
    }

    /// Close this client performed after the reconnect grace period.
    pub fn grace_elapsed() -> Self {
        Self {
            code: CloseCode::Normal,
            graceful: true,
            local: true,
            detail: "reconnect grace period elapsed".to_string(),
        }
    }

    /// Synthetic close after too many missed keepalives.
    pub fn keepalive_exhausted(missed: u32) -> Self {
        Self {
            code: CloseCode::NetworkTimeout,
            graceful: false,
            local: true,
            detail: format!("{missed} keepalives missed"),
        }
    }

    /// Synthetic close when a reconnect attempt could not open a transport.
    pub fn open_failed(to_target: bool, detail: impl Into<String>) -> Self {
        Self {
            code: if to_target {
                CloseCode::InvalidReconnectUrl
            } else {
                CloseCode::NetworkError
            },
            graceful: false,
            local: true,
            detail: detail.into(),
        }
    }
}

/// Where a reconnect attempt goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectTarget {
    /// Fresh handshake against the default endpoint.
    Default,
    /// Server-provided reconnect URL.
    Redirect(String),
}

impl ReconnectTarget {
    /// Label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Redirect(_) => "redirect",
        }
    }
}

/// Outcome of a close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectDecision {
    Reconnect {
        target: ReconnectTarget,
        delay: Duration,
    },
    /// Terminal for this session.
    GiveUp,
    /// Nothing to resume; the session stays closed.
    Idle,
}

/// Close-code driven reconnect policy.
#[derive(Debug, Clone)]
pub struct ReconnectSupervisor {
    delay: Duration,
}

impl Default for ReconnectSupervisor {
    fn default() -> Self {
        Self::new(RECONNECT_DELAY)
    }
}

impl ReconnectSupervisor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Decide what to do after a close.
    pub fn decide(&self, code: CloseCode, reconnect_target: Option<&str>) -> ReconnectDecision {
        match code {
            CloseCode::ClientSentInboundTraffic => ReconnectDecision::GiveUp,
            CloseCode::InternalServerError
            | CloseCode::FailedPingPong
            | CloseCode::ConnectionUnused
            | CloseCode::ReconnectGraceExpired
            | CloseCode::NetworkTimeout
            | CloseCode::NetworkError
            | CloseCode::InvalidReconnectUrl => self.reconnect(ReconnectTarget::Default),
            CloseCode::Normal | CloseCode::Other(_) => match reconnect_target {
                Some(url) => self.reconnect(ReconnectTarget::Redirect(url.to_string())),
                None => ReconnectDecision::Idle,
            },
        }
    }

    fn reconnect(&self, target: ReconnectTarget) -> ReconnectDecision {
        ReconnectDecision::Reconnect {
            target,
            delay: self.delay,
        }
    }
}
