//! Conduit shard registrar.
//!
//! Binds the current EventSub session to a conduit shard so subscriptions
//! routed through the conduit follow the session across reconnects. This is
//! the only subscription-management call the service makes.

use crate::config::ConduitConfig;
use crate::error::{RegistrarError, RegistrarResult};
use eventsub_telemetry::Metrics;
use eventsub_ws::SessionRegistrar;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct ShardUpdateRequest<'a> {
    conduit_id: &'a str,
    shards: Vec<ShardUpdate<'a>>,
}

#[derive(Debug, Serialize)]
struct ShardUpdate<'a> {
    id: &'a str,
    transport: ShardTransport<'a>,
}

#[derive(Debug, Serialize)]
struct ShardTransport<'a> {
    method: &'static str,
    session_id: &'a str,
}

/// Registrar backed by the Helix conduit shards endpoint.
pub struct ConduitRegistrar {
    client: Client,
    endpoint: String,
    conduit_id: String,
    shard_id: String,
    client_id: String,
    app_token: String,
}

impl ConduitRegistrar {
    /// Build a registrar from configuration.
    ///
    /// Fails if the conduit id or either credential is missing.
    pub fn new(config: &ConduitConfig) -> RegistrarResult<Self> {
        let conduit_id = config
            .conduit_id
            .clone()
            .ok_or(RegistrarError::MissingCredentials("conduit_id"))?;
        let client_id = config
            .client_id
            .clone()
            .ok_or(RegistrarError::MissingCredentials("client_id"))?;
        let app_token = config
            .app_token
            .clone()
            .ok_or(RegistrarError::MissingCredentials("app_token"))?;

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| RegistrarError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/eventsub/conduits/shards",
                config.api_base_url.trim_end_matches('/')
            ),
            conduit_id,
            shard_id: config.shard_id.clone(),
            client_id,
            app_token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body<'a>(&'a self, session_id: &'a str) -> ShardUpdateRequest<'a> {
        ShardUpdateRequest {
            conduit_id: &self.conduit_id,
            shards: vec![ShardUpdate {
                id: &self.shard_id,
                transport: ShardTransport {
                    method: "websocket",
                    session_id,
                },
            }],
        }
    }

    /// Point the configured shard at `session_id`.
    pub async fn update_shard(&self, session_id: &str) -> RegistrarResult<()> {
        debug!(
            conduit_id = %self.conduit_id,
            shard_id = %self.shard_id,
            session_id = %session_id,
            "Updating conduit shard"
        );

        let response = self
            .client
            .patch(&self.endpoint)
            .header("Client-Id", &self.client_id)
            .bearer_auth(&self.app_token)
            .json(&self.request_body(session_id))
            .send()
            .await
            .map_err(|e| RegistrarError::Http(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistrarError::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!(
            conduit_id = %self.conduit_id,
            shard_id = %self.shard_id,
            session_id = %session_id,
            "Conduit shard updated"
        );
        Ok(())
    }
}

impl SessionRegistrar for ConduitRegistrar {
    type Error = RegistrarError;

    async fn session_changed(&self, session_id: &str) -> RegistrarResult<()> {
        let result = self.update_shard(session_id).await;
        Metrics::session_change(result.is_ok());
        result
    }
}
