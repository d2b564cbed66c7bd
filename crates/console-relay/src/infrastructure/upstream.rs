//! Upstream transport.
//!
//! The worker never sees a WebSocket type directly.  It opens an
//! [`UpstreamLink`] through an [`UpstreamConnector`] and then talks to two
//! independent halves:
//!
//! - [`FrameSink`] – text frames and keepalive pings towards the upstream.
//! - [`FrameStream`] – text frames from the upstream; `None` once closed.
//!
//! [`WsConnector`] is the production implementation on top of
//! `tokio-tungstenite`.  Tests plug in-memory links into the same traits.
//!
//! Dropping both halves releases the socket.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use console_core::{Region, ServerId};

use crate::domain::ConsoleConfig;

/// A transport-level failure: refused upgrade, reset socket, failed write.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<WsError> for TransportError {
    fn from(e: WsError) -> Self {
        TransportError(e.to_string())
    }
}

/// Write half of an upstream session.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, frame: String) -> Result<(), TransportError>;

    /// Sends a transport-level keepalive.
    async fn send_ping(&mut self) -> Result<(), TransportError>;

    /// Starts a graceful close.  Errors are ignored; the socket is released
    /// when the sink is dropped either way.
    async fn close(&mut self);
}

/// Read half of an upstream session.
#[async_trait]
pub trait FrameStream: Send {
    /// Next text frame, or `None` once the upstream closed the session.
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;
}

/// An opened upstream socket, split into its two halves.
pub struct UpstreamLink {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

/// Opens upstream sockets.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Performs the transport handshake for `server_id`.
    async fn open(&self, server_id: ServerId, region: Region) -> Result<UpstreamLink, TransportError>;
}

// ── tokio-tungstenite implementation ─────────────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the upstream control plane over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: String,
    token: Option<String>,
    subprotocol: Option<String>,
}

impl WsConnector {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        subprotocol: Option<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            token,
            subprotocol,
        }
    }

    pub fn from_config(config: &ConsoleConfig) -> Self {
        Self::new(
            config.endpoint.clone(),
            config.token.clone(),
            config.subprotocol.clone(),
        )
    }
}

#[async_trait]
impl UpstreamConnector for WsConnector {
    async fn open(&self, server_id: ServerId, region: Region) -> Result<UpstreamLink, TransportError> {
        let mut request = self.endpoint.as_str().into_client_request()?;
        let headers = request.headers_mut();

        if let Some(protocol) = &self.subprotocol {
            let value = HeaderValue::from_str(protocol)
                .map_err(|e| TransportError(format!("invalid sub-protocol: {e}")))?;
            headers.insert(header::SEC_WEBSOCKET_PROTOCOL, value);
        }
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError(format!("invalid token: {e}")))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let (ws, response) = connect_async(request).await?;
        debug!(
            server_id,
            %region,
            status = %response.status(),
            "upstream WebSocket upgrade complete"
        );

        let (sink, stream) = ws.split();
        Ok(UpstreamLink {
            sink: Box::new(WsFrameSink { sink }),
            stream: Box::new(WsFrameStream { stream }),
        })
    }
}

struct WsFrameSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send_text(&mut self, frame: String) -> Result<(), TransportError> {
        self.sink.send(Message::Text(frame)).await?;
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.sink.send(Message::Ping(Vec::new())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!("upstream close handshake failed: {e}");
        }
    }
}

struct WsFrameStream {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => warn!("dropping non-UTF-8 binary frame from upstream"),
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "upstream sent close frame");
                    return None;
                }
                // Ping replies are queued by tungstenite itself.
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
