//! Prometheus metrics for the EventSub session manager.
//!
//! Covers:
//! - Connection state (one-hot over the five session states)
//! - Reconnect attempts by target
//! - Frames received and keepalive misses
//! - Notification dispatch and drops
//! - Session registration outcomes
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A failure means duplicate metric
//! names, which is a startup configuration error. These panics only happen
//! during static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec, Counter,
    CounterVec, Encoder, Gauge, GaugeVec, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Session states exported on `eventsub_ws_state`.
pub const SESSION_STATES: [&str; 5] = [
    "disconnected",
    "connecting",
    "established",
    "draining",
    "closed",
];

/// Transport connection state (1 = established or draining).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "eventsub_ws_connected",
        "EventSub transport connection state (1=connected)"
    )
    .unwrap()
});

/// Session state machine current state.
/// Labels: state (disconnected/connecting/established/draining/closed)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "eventsub_ws_state",
        "Session state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Reconnect attempts.
/// Labels: target (default/redirect)
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "eventsub_ws_reconnect_total",
        "Total EventSub reconnect attempts",
        &["target"]
    )
    .unwrap()
});

pub static FRAMES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "eventsub_frames_total",
        "Total text frames received, malformed included"
    )
    .unwrap()
});

/// Consecutive missed keepalive checks on the current transport.
pub static KEEPALIVE_MISSED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "eventsub_keepalive_missed",
        "Consecutive missed keepalive checks"
    )
    .unwrap()
});

pub static NOTIFICATIONS_DROPPED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "eventsub_notifications_dropped_total",
        "Notifications dropped because the downstream channel could not accept them"
    )
    .unwrap()
});

/// Labels: subscription_type
pub static NOTIFICATIONS_DISPATCHED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "eventsub_notifications_dispatched_total",
        "Notifications handed to the notification handler",
        &["subscription_type"]
    )
    .unwrap()
});

/// Labels: outcome (ok/error)
pub static SESSION_CHANGES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "eventsub_session_changes_total",
        "Session identity changes reported to the subscription service",
        &["outcome"]
    )
    .unwrap()
});

/// Metrics recording helper.
pub struct Metrics;

impl Metrics {
    pub fn ws_connected() {
        WS_CONNECTED.set(1.0);
    }

    pub fn ws_disconnected() {
        WS_CONNECTED.set(0.0);
    }

    /// Set the session state. Only the active state is 1.
    pub fn ws_state_set(state: &str) {
        for s in SESSION_STATES {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
    }

    /// Record reconnect attempts toward `target`.
    pub fn ws_reconnect(target: &str, attempts: u64) {
        if attempts > 0 {
            WS_RECONNECT_TOTAL
                .with_label_values(&[target])
                .inc_by(attempts as f64);
        }
    }

    pub fn frames_received(count: u64) {
        if count > 0 {
            FRAMES_TOTAL.inc_by(count as f64);
        }
    }

    pub fn keepalive_missed(missed: u32) {
        KEEPALIVE_MISSED.set(f64::from(missed));
    }

    pub fn notifications_dropped(count: u64) {
        if count > 0 {
            NOTIFICATIONS_DROPPED_TOTAL.inc_by(count as f64);
        }
    }

    pub fn notification_dispatched(subscription_type: &str) {
        NOTIFICATIONS_DISPATCHED_TOTAL
            .with_label_values(&[subscription_type])
            .inc();
    }

    pub fn session_change(ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        SESSION_CHANGES_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Render the default registry in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
