//! Subscription-management collaborator.
//!
//! Whenever the remote assigns a new session id, the subscription bindings
//! (conduit shards) must be pointed at it. The session core only needs that
//! one call and treats it as best-effort.

use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;

/// Receives session id changes.
pub trait SessionRegistrar: Send + Sync + 'static {
    type Error: Display + Send;

    /// Rebind delivery to `session_id`.
    fn session_changed(&self, session_id: &str)
        -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Registrar that does nothing, for sessions without subscription bindings.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRegistrar;

impl SessionRegistrar for NoopRegistrar {
    type Error = Infallible;

    async fn session_changed(&self, _session_id: &str) -> Result<(), Infallible> {
        Ok(())
    }
}
