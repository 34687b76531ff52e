//! Mock EventSub WebSocket server for integration tests.
//!
//! Provides a WebSocket server that:
//! - Sends a welcome frame on every connection (`<prefix>-<n>` session ids)
//! - Broadcasts scripted frames and closes to connected clients
//! - Records the close codes clients send

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Default)]
struct State {
    connections: u32,
    peers: Vec<mpsc::UnboundedSender<Message>>,
    client_closes: Vec<u16>,
}

/// A mock EventSub server for testing.
pub struct MockEventSubServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    state: Arc<Mutex<State>>,
}

impl MockEventSubServer {
    /// Start a server on an available port.
    pub async fn start(prefix: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::default()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let state_clone = state.clone();
        let prefix = prefix.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(stream, state_clone.clone(), prefix.clone()));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            state,
        }
    }

    /// The server's WebSocket URL.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn connection_count(&self) -> u32 {
        self.state.lock().await.connections
    }

    /// Close codes received from clients.
    pub async fn client_closes(&self) -> Vec<u16> {
        self.state.lock().await.client_closes.clone()
    }

    /// Send a frame to every connected client.
    pub async fn broadcast(&self, frame: Value) {
        let state = self.state.lock().await;
        for peer in &state.peers {
            let _ = peer.send(Message::Text(frame.to_string()));
        }
    }

    /// Close every connection with `code`.
    pub async fn close_all(&self, code: u16) {
        let state = self.state.lock().await;
        for peer in &state.peers {
            let _ = peer.send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: Cow::Borrowed("server close"),
            })));
        }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<Mutex<State>>, prefix: String) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let session_number = {
        let mut state = state.lock().await;
        state.connections += 1;
        state.peers.push(tx);
        state.connections
    };

    let (mut write, mut read) = ws_stream.split();

    let welcome = welcome(&format!("{prefix}-{session_number}"), 10);
    if write.send(Message::Text(welcome.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            Some(outbound) = rx.recv() => {
                let closing = matches!(outbound, Message::Close(_));
                if write.send(outbound).await.is_err() || closing {
                    break;
                }
            }
            inbound = read.next() => match inbound {
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        state.lock().await.client_closes.push(frame.code.into());
                    }
                    break;
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(_)) => {}
                _ => break,
            }
        }
    }
}

pub fn welcome(session_id: &str, keepalive_secs: u64) -> Value {
    json!({
        "metadata": {
            "message_id": format!("welcome-{session_id}"),
            "message_type": "session_welcome",
            "message_timestamp": "2024-01-01T00:00:00.000000000Z"
        },
        "payload": {"session": {
            "id": session_id,
            "status": "connected",
            "connected_at": "2024-01-01T00:00:00.000000000Z",
            "keepalive_timeout_seconds": keepalive_secs,
            "reconnect_url": null
        }}
    })
}

pub fn notification(message_id: &str) -> Value {
    json!({
        "metadata": {
            "message_id": message_id,
            "message_type": "notification",
            "message_timestamp": "2024-01-01T00:00:01.000000000Z",
            "subscription_type": "channel.follow",
            "subscription_version": "2"
        },
        "payload": {
            "subscription": {
                "id": "sub-1",
                "status": "enabled",
                "type": "channel.follow",
                "version": "2",
                "condition": {"broadcaster_user_id": "1"},
                "transport": {"method": "conduit", "conduit_id": "c-1"}
            },
            "event": {"user_id": "2", "user_name": "viewer"}
        }
    })
}

pub fn reconnect(session_id: &str, url: &str) -> Value {
    json!({
        "metadata": {
            "message_id": "reconnect-1",
            "message_type": "session_reconnect",
            "message_timestamp": "2024-01-01T00:00:02.000000000Z"
        },
        "payload": {"session": {
            "id": session_id,
            "status": "reconnecting",
            "keepalive_timeout_seconds": null,
            "reconnect_url": url
        }}
    })
}
