//! Scripted in-memory transport.
//!
//! Every `open` hands the test a [`Remote`] that can push frames and closes
//! into the transport and inspect the local closes the session performed.

use eventsub_ws::{
    CloseCode, CloseEvent, Connector, Transport, TransportEvent, WsError, WsResult,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Default)]
struct Shared {
    opens: Vec<(String, Instant)>,
    failing: HashSet<String>,
    remotes: Option<mpsc::UnboundedSender<Remote>>,
}

/// Connector whose transports are driven by the test.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedConnector {
    /// Create a connector plus the stream of remotes it opens.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Remote>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self::default();
        connector.shared.lock().remotes = Some(tx);
        (connector, rx)
    }

    /// Make every open of `url` fail.
    pub fn fail(&self, url: &str) {
        self.shared.lock().failing.insert(url.to_string());
    }

    /// URLs opened so far, with the time of each attempt.
    pub fn opens(&self) -> Vec<(String, Instant)> {
        self.shared.lock().opens.clone()
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.opens().into_iter().map(|(url, _)| url).collect()
    }
}

impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    async fn open(&self, url: &str) -> WsResult<ScriptedTransport> {
        let mut shared = self.shared.lock();
        shared.opens.push((url.to_string(), Instant::now()));
        if shared.failing.contains(url) {
            return Err(WsError::ConnectionFailed(format!("refused: {url}")));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let closes = Arc::new(Mutex::new(Vec::new()));
        let remote = Remote {
            url: url.to_string(),
            tx,
            closes: closes.clone(),
        };
        if let Some(remotes) = &shared.remotes {
            let _ = remotes.send(remote);
        }
        Ok(ScriptedTransport { rx, closes })
    }
}

pub struct ScriptedTransport {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
    closes: Arc<Mutex<Vec<(CloseCode, Instant)>>>,
}

impl Transport for ScriptedTransport {
    async fn next_event(&mut self) -> TransportEvent {
        match self.rx.recv().await {
            Some(event) => event,
            None => TransportEvent::Closed(CloseEvent::abnormal("remote dropped")),
        }
    }

    async fn close(&mut self, code: CloseCode) -> WsResult<()> {
        self.closes.lock().push((code, Instant::now()));
        Ok(())
    }
}

/// Test side of one scripted transport.
pub struct Remote {
    pub url: String,
    tx: mpsc::UnboundedSender<TransportEvent>,
    closes: Arc<Mutex<Vec<(CloseCode, Instant)>>>,
}

impl Remote {
    pub fn send(&self, frame: Value) {
        let _ = self.tx.send(TransportEvent::Text(frame.to_string()));
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.tx.send(TransportEvent::Text(text.to_string()));
    }

    /// Close from the remote side.
    pub fn close(&self, code: u16) {
        let _ = self
            .tx
            .send(TransportEvent::Closed(CloseEvent::remote(code, "")));
    }

    /// Local closes performed by the session on this transport.
    pub fn local_closes(&self) -> Vec<(CloseCode, Instant)> {
        self.closes.lock().clone()
    }
}

pub fn welcome(id: &str, keepalive_secs: Option<u64>) -> Value {
    json!({
        "metadata": {
            "message_id": format!("welcome-{id}"),
            "message_type": "session_welcome",
            "message_timestamp": "2024-01-01T00:00:00Z"
        },
        "payload": {"session": {
            "id": id,
            "status": "connected",
            "keepalive_timeout_seconds": keepalive_secs,
            "reconnect_url": null
        }}
    })
}

pub fn keepalive() -> Value {
    json!({"metadata": {"message_type": "session_keepalive"}, "payload": {}})
}

pub fn reconnect(url: Option<&str>) -> Value {
    json!({
        "metadata": {"message_type": "session_reconnect"},
        "payload": {"session": {"id": "S1", "status": "reconnecting", "reconnect_url": url}}
    })
}

pub fn notification(message_id: &str) -> Value {
    json!({
        "metadata": {
            "message_id": message_id,
            "message_type": "notification",
            "subscription_type": "channel.chat.message",
            "subscription_version": "1"
        },
        "payload": {
            "subscription": {"id": "sub-1", "status": "enabled", "type": "channel.chat.message"},
            "event": {"message": {"text": "hello"}}
        }
    })
}
