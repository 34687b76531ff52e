//! EventSub WebSocket session manager.
//!
//! Maintains one long-lived streaming connection to the EventSub service:
//! - Session identity tracking from welcome frames
//! - Keepalive monitoring (interval + 2s buffer, 10 missed checks force a close)
//! - Close-code driven reconnects with a fixed 5s delay
//! - Reconnect-request handling with a 5s grace period
//! - Channel-based notification forwarding

pub mod connection;
pub mod error;
pub mod keepalive;
pub mod message;
pub mod reconnect;
pub mod registrar;
pub mod session;
pub mod transport;

pub use connection::{
    ConnectionConfig, ConnectionManager, SessionHandle, SessionStatus, DEFAULT_EVENTSUB_URL,
};
pub use error::{WsError, WsResult};
pub use keepalive::{KeepaliveMonitor, KeepaliveState, KeepaliveVerdict, MAX_MISSED_KEEPALIVES};
pub use message::{
    Frame, FrameMetadata, FramePayload, MessageType, RevocationReason, SessionPayload,
    SubscriptionPayload,
};
pub use reconnect::{
    CloseCode, CloseEvent, ReconnectDecision, ReconnectSupervisor, ReconnectTarget,
};
pub use registrar::{NoopRegistrar, SessionRegistrar};
pub use session::{Session, SessionAction, SessionMachine, SessionState};
pub use transport::{Connector, Transport, TransportEvent, TungsteniteConnector};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
