//! EventSub frame types.
//!
//! Every frame received over the transport is a JSON object with a
//! `metadata` block carrying the `message_type` discriminant and a
//! `payload` block whose populated fields depend on that discriminant.

use crate::error::{WsError, WsResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Frame envelope
// ============================================================================

/// Discriminant carried in `metadata.message_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[serde(alias = "welcome")]
    SessionWelcome,
    #[serde(alias = "keepalive")]
    SessionKeepalive,
    Notification,
    #[serde(alias = "reconnect")]
    SessionReconnect,
    Revocation,
    /// Any discriminant this client does not know about.
    #[serde(other)]
    Unknown,
}

impl MessageType {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionWelcome => "session_welcome",
            Self::SessionKeepalive => "session_keepalive",
            Self::Notification => "notification",
            Self::SessionReconnect => "session_reconnect",
            Self::Revocation => "revocation",
            Self::Unknown => "unknown",
        }
    }

    /// Welcome and keepalive frames prove the connection is alive.
    pub fn is_liveness(&self) -> bool {
        matches!(self, Self::SessionWelcome | Self::SessionKeepalive)
    }
}

/// One discrete message received over the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub metadata: FrameMetadata,
    #[serde(default)]
    pub payload: FramePayload,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Frame {
    /// Parse a text frame.
    pub fn parse(text: &str) -> WsResult<Self> {
        serde_json::from_str(text).map_err(|e| WsError::ParseError(e.to_string()))
    }

    pub fn message_type(&self) -> MessageType {
        self.metadata.message_type
    }

    /// Session block of the payload, if any.
    pub fn session(&self) -> Option<&SessionPayload> {
        self.payload.session.as_ref()
    }

    /// Subscription type for notification and revocation frames.
    ///
    /// Prefers the metadata value and falls back to the payload subscription.
    pub fn subscription_type(&self) -> Option<&str> {
        self.metadata.subscription_type.as_deref().or_else(|| {
            self.payload
                .subscription
                .as_ref()
                .and_then(|s| s.subscription_type.as_deref())
        })
    }
}

/// Frame metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMetadata {
    /// Unique message identifier assigned by the remote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub message_type: MessageType,
    /// Time the remote sent the frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Frame payload. Fields are populated per message type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FramePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<SubscriptionPayload>,
    /// Subscription-type specific event body, forwarded untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Value>,
    /// Fields outside the typed view, such as batched `events`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// Payload blocks
// ============================================================================

/// Session block carried by welcome, keepalive and reconnect frames.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalive_timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Subscription block carried by notification and revocation frames.
///
/// Only the fields the session core inspects are typed; everything else is
/// carried in `extra` for downstream consumers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub condition: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub transport: Value,
    /// Remaining fields (`cost`, `created_at`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// Revocation
// ============================================================================

/// Reason a subscription was revoked server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    UserRemoved,
    AuthorizationRevoked,
    VersionRemoved,
    Unknown,
}

impl RevocationReason {
    /// Classify a subscription status string.
    pub fn from_status(status: Option<&str>) -> Self {
        match status {
            Some("user_removed") => Self::UserRemoved,
            Some("authorization_revoked") => Self::AuthorizationRevoked,
            Some("version_removed") => Self::VersionRemoved,
            _ => Self::Unknown,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::UserRemoved => "The user no longer exists",
            Self::AuthorizationRevoked => "The authorization token was revoked",
            Self::VersionRemoved => "The subscription type/version is no longer supported",
            Self::Unknown => "Unknown reason",
        }
    }
}
