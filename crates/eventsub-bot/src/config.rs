//! Application configuration.

use crate::error::{AppError, AppResult};
use eventsub_ws::{ConnectionConfig, DEFAULT_EVENTSUB_URL};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Environment variable prefix for layered configuration.
pub const ENV_PREFIX: &str = "EVENTSUB";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// WebSocket session configuration.
    #[serde(default)]
    pub websocket: WsConfig,
    /// Conduit shard registration.
    #[serde(default)]
    pub conduit: ConduitConfig,
    /// Notification dispatch.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Logging and metrics.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// WebSocket session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Default EventSub endpoint.
    #[serde(default = "default_ws_url")]
    pub url: String,
    /// Fixed delay before every reconnect attempt (ms). Default: 5,000.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Grace period after a reconnect request (ms). Default: 5,000.
    #[serde(default = "default_reconnect_grace_ms")]
    pub reconnect_grace_ms: u64,
    /// Jitter allowance added to the keepalive window (ms). Default: 2,000.
    #[serde(default = "default_keepalive_buffer_ms")]
    pub keepalive_buffer_ms: u64,
    /// Missed keepalive checks that force a reconnect. Default: 10.
    #[serde(default = "default_max_missed_keepalives")]
    pub max_missed_keepalives: u32,
    /// Keepalive interval before the first welcome (s). Default: 10.
    #[serde(default = "default_keepalive_secs")]
    pub default_keepalive_secs: u64,
    /// Capacity of the notification channel. Default: 256.
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,
}

fn default_ws_url() -> String {
    DEFAULT_EVENTSUB_URL.to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_reconnect_grace_ms() -> u64 {
    5_000
}

fn default_keepalive_buffer_ms() -> u64 {
    2_000
}

fn default_max_missed_keepalives() -> u32 {
    10
}

fn default_keepalive_secs() -> u64 {
    10
}

fn default_notification_buffer() -> usize {
    256
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: default_ws_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_grace_ms: default_reconnect_grace_ms(),
            keepalive_buffer_ms: default_keepalive_buffer_ms(),
            max_missed_keepalives: default_max_missed_keepalives(),
            default_keepalive_secs: default_keepalive_secs(),
            notification_buffer: default_notification_buffer(),
        }
    }
}

impl From<WsConfig> for ConnectionConfig {
    fn from(cfg: WsConfig) -> Self {
        Self {
            url: cfg.url,
            reconnect_delay_ms: cfg.reconnect_delay_ms,
            reconnect_grace_ms: cfg.reconnect_grace_ms,
            keepalive_buffer_ms: cfg.keepalive_buffer_ms,
            max_missed_keepalives: cfg.max_missed_keepalives,
            default_keepalive_secs: cfg.default_keepalive_secs,
        }
    }
}

/// Conduit shard registration.
///
/// Registration is skipped when `conduit_id` is unset.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConduitConfig {
    #[serde(default)]
    pub conduit_id: Option<String>,
    /// Shard bound to this session. Default: "0".
    #[serde(default = "default_shard_id")]
    pub shard_id: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Application client id (also `TWITCH_CLIENT_ID`).
    #[serde(default)]
    pub client_id: Option<String>,
    /// App access token (also `TWITCH_APP_TOKEN`).
    #[serde(default)]
    pub app_token: Option<String>,
    /// Per-request timeout (ms). Default: 10,000.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_shard_id() -> String {
    "0".to_string()
}

fn default_api_base_url() -> String {
    "https://api.twitch.tv/helix".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for ConduitConfig {
    fn default() -> Self {
        Self {
            conduit_id: None,
            shard_id: default_shard_id(),
            api_base_url: default_api_base_url(),
            client_id: None,
            app_token: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl fmt::Debug for ConduitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConduitConfig")
            .field("conduit_id", &self.conduit_id)
            .field("shard_id", &self.shard_id)
            .field("api_base_url", &self.api_base_url)
            .field("client_id", &self.client_id)
            .field("app_token", &self.app_token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

impl ConduitConfig {
    pub fn is_enabled(&self) -> bool {
        self.conduit_id.is_some()
    }

    /// Fill missing credentials from `TWITCH_CLIENT_ID` / `TWITCH_APP_TOKEN`.
    pub fn fill_credentials(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.client_id.is_none() {
            self.client_id = lookup("TWITCH_CLIENT_ID");
        }
        if self.app_token.is_none() {
            self.app_token = lookup("TWITCH_APP_TOKEN");
        }
    }
}

/// Notification dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Handler invocations allowed to run concurrently. Default: 32.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_max_in_flight() -> usize {
    32
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Session metrics refresh interval (s). Default: 10.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval_secs() -> u64 {
    10
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

impl AppConfig {
    /// Load layered configuration: optional TOML file, then `EVENTSUB__*`
    /// environment variables (`EVENTSUB__WEBSOCKET__URL`, ...).
    pub fn load(path: Option<&str>) -> AppResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::new(path, config::FileFormat::Toml).required(false),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let mut cfg: Self = builder
            .build()
            .and_then(|c| c.try_deserialize::<Self>())
            .map_err(|e| AppError::Config(format!("Failed to load config: {e}")))?;

        cfg.conduit.fill_credentials(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        let cfg: Self = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> AppResult<()> {
        let url = &self.websocket.url;
        if !(url.starts_with("wss://") || url.starts_with("ws://")) {
            return Err(AppError::Config(format!(
                "websocket.url must be a ws:// or wss:// URL, got {url:?}"
            )));
        }
        if self.websocket.notification_buffer == 0 {
            return Err(AppError::Config(
                "websocket.notification_buffer must be positive".to_string(),
            ));
        }
        if self.dispatch.max_in_flight == 0 {
            return Err(AppError::Config(
                "dispatch.max_in_flight must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
