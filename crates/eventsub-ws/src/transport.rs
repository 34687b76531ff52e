//! Transport abstraction and the tokio-tungstenite adapter.
//!
//! The connection loop only needs a stream of text frames terminated by a
//! close, plus the ability to close locally. Keeping that behind a trait lets
//! the loop be re-attached to a fresh transport on every reconnect and lets
//! tests drive it with scripted transports.

use crate::error::{WsError, WsResult};
use crate::reconnect::{CloseCode, CloseEvent};
use futures_util::StreamExt;
use std::borrow::Cow;
use std::future::Future;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WireCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Event produced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame.
    Text(String),
    /// The transport is gone. No further events follow.
    Closed(CloseEvent),
}

/// A bidirectional connection to one remote endpoint.
pub trait Transport: Send + 'static {
    /// Next event. Must be cancel-safe.
    fn next_event(&mut self) -> impl Future<Output = TransportEvent> + Send;

    /// Close the connection locally.
    fn close(&mut self, code: CloseCode) -> impl Future<Output = WsResult<()>> + Send;
}

/// Opens transports.
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    fn open(&self, url: &str) -> impl Future<Output = WsResult<Self::Transport>> + Send;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket transports with tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    type Transport = TungsteniteTransport;

    async fn open(&self, url: &str) -> WsResult<TungsteniteTransport> {
        info!(url = %url, "Connecting to WebSocket");

        // TCP_NODELAY on
        let (stream, _response) = connect_async_tls_with_config(url, None, true, None)
            .await
            .map_err(|e| WsError::ConnectionFailed(format!("{url}: {e}")))?;

        info!(url = %url, "WebSocket connected");
        Ok(TungsteniteTransport { stream })
    }
}

/// WebSocket transport.
pub struct TungsteniteTransport {
    stream: WsStream,
}

impl Transport for TungsteniteTransport {
    async fn next_event(&mut self) -> TransportEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Text(text),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (f.code.into(), f.reason.to_string()))
                        .unwrap_or((1000, "Normal close".to_string()));
                    return TransportEvent::Closed(CloseEvent::remote(code, reason));
                }
                // Pongs are queued by tungstenite itself.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    debug!("Received control frame");
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!(len = data.len(), "Ignoring binary frame");
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    warn!(?e, "WebSocket read error");
                    return TransportEvent::Closed(CloseEvent::abnormal(e.to_string()));
                }
                None => {
                    return TransportEvent::Closed(CloseEvent::abnormal("WebSocket stream ended"));
                }
            }
        }
    }

    async fn close(&mut self, code: CloseCode) -> WsResult<()> {
        let frame = CloseFrame {
            code: WireCloseCode::from(code.as_u16()),
            reason: Cow::Borrowed(code.reason()),
        };
        self.stream.close(Some(frame)).await?;
        Ok(())
    }
}
