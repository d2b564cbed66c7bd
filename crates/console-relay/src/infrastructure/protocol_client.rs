//! One upstream session, and the handle callers use to reach it.
//!
//! [`ProtocolClient::open`] performs the whole handshake:
//!
//! 1. transport upgrade through the [`UpstreamConnector`],
//! 2. `connection_init` (with the bearer token when configured),
//! 3. `start` for the `consoleMessages` subscription of this server.
//!
//! The client is then split into a [`SessionWriter`] and a [`SessionReader`]
//! so the worker can wait on inbound frames while it writes commands.
//!
//! [`ClientHandle`] is the caller side.  It never touches the socket: it
//! queues an outbound frame on the worker's channel and waits for the
//! worker's write acknowledgement.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use console_core::protocol::{command_frame, connection_init_frame, subscribe_frame};
use console_core::{parse_inbound, ConnectionState, ConnectionStatus, InboundFrame, Region, ServerId};

use super::upstream::{FrameSink, FrameStream, TransportError, UpstreamConnector};
use crate::application::{SharedRateLimiter, CONSOLE_SEND};
use crate::domain::ConsoleError;

/// A handshaken upstream session for one server.
pub struct ProtocolClient {
    server_id: ServerId,
    region: Region,
    sink: Box<dyn FrameSink>,
    stream: Box<dyn FrameStream>,
}

impl ProtocolClient {
    /// Opens the transport and subscribes to the server's console.
    ///
    /// # Errors
    ///
    /// [`TransportError`] if the upgrade or either handshake frame fails.
    pub async fn open(
        connector: &dyn UpstreamConnector,
        server_id: ServerId,
        region: Region,
        token: Option<&str>,
    ) -> Result<Self, TransportError> {
        let link = connector.open(server_id, region).await?;
        let mut client = Self {
            server_id,
            region,
            sink: link.sink,
            stream: link.stream,
        };

        client.sink.send_text(connection_init_frame(token)).await?;
        client
            .sink
            .send_text(subscribe_frame(server_id, region))
            .await?;
        debug!(server_id, %region, "console subscription requested");

        Ok(client)
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// Splits the session into independently usable halves.
    pub fn split(self) -> (SessionWriter, SessionReader) {
        (
            SessionWriter {
                server_id: self.server_id,
                region: self.region,
                sink: self.sink,
            },
            SessionReader {
                server_id: self.server_id,
                stream: self.stream,
            },
        )
    }
}

/// Write half of a session.
pub struct SessionWriter {
    server_id: ServerId,
    region: Region,
    sink: Box<dyn FrameSink>,
}

impl SessionWriter {
    /// Sends `command` wrapped in the `sendConsoleMessage` envelope.
    ///
    /// # Errors
    ///
    /// - [`ConsoleError::Protocol`] if the envelope cannot be encoded.
    /// - [`ConsoleError::Connection`] if the write fails; the session is
    ///   unusable afterwards.
    pub async fn transmit(&mut self, command: &str) -> Result<(), ConsoleError> {
        let frame = command_frame(self.server_id, self.region, command)?;
        self.sink
            .send_text(frame)
            .await
            .map_err(|e| ConsoleError::Connection {
                server_id: self.server_id,
                reason: e.to_string(),
            })?;
        debug!(server_id = self.server_id, command, "command frame sent");
        Ok(())
    }

    pub async fn ping(&mut self) -> Result<(), TransportError> {
        self.sink.send_ping().await
    }

    pub async fn close(&mut self) {
        self.sink.close().await;
    }
}

/// Read half of a session.
pub struct SessionReader {
    server_id: ServerId,
    stream: Box<dyn FrameStream>,
}

impl SessionReader {
    /// Next meaningful frame.
    ///
    /// Malformed frames are logged and skipped; they never end the session.
    /// Returns `None` once the upstream closed the socket.
    pub async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        loop {
            let text = match self.stream.next_text().await? {
                Ok(text) => text,
                Err(e) => return Some(Err(e)),
            };
            match parse_inbound(&text) {
                Ok(frame) => return Some(Ok(frame)),
                Err(e) => warn!(server_id = self.server_id, "dropping upstream frame: {e}"),
            }
        }
    }
}

// ── Caller-side handle ───────────────────────────────────────────────────────

/// One queued outbound command and the channel for its write result.
#[derive(Debug)]
pub struct Outbound {
    pub text: String,
    pub ack: oneshot::Sender<Result<(), ConsoleError>>,
}

/// Cheap, cloneable access to a connection worker.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    server_id: ServerId,
    outbound: mpsc::Sender<Outbound>,
    status: watch::Receiver<ConnectionStatus>,
    limiter: Arc<SharedRateLimiter>,
}

impl ClientHandle {
    pub fn new(
        server_id: ServerId,
        outbound: mpsc::Sender<Outbound>,
        status: watch::Receiver<ConnectionStatus>,
        limiter: Arc<SharedRateLimiter>,
    ) -> Self {
        Self {
            server_id,
            outbound,
            status,
            limiter,
        }
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// Latest status published by the worker.
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().state == ConnectionState::Connected
    }

    /// A receiver that observes every status change of the worker.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Checks the session is live and takes a `console.send` slot.
    ///
    /// # Errors
    ///
    /// [`ConsoleError::NotConnected`] or [`ConsoleError::RateLimited`].
    pub async fn admit(&self) -> Result<(), ConsoleError> {
        if !self.is_connected() {
            return Err(ConsoleError::NotConnected(self.server_id));
        }
        self.limiter.acquire(CONSOLE_SEND).await?;
        Ok(())
    }

    /// Hands `text` to the worker and waits until it has been written.
    ///
    /// # Errors
    ///
    /// [`ConsoleError::NotConnected`] if the worker is not Connected by the
    /// time it sees the frame, [`ConsoleError::WorkerGone`] if the worker
    /// stopped, or the write error.  In the first two cases the frame never
    /// left, and the `console.send` slot taken by [`admit`](Self::admit) is
    /// given back.
    pub async fn transmit(&self, text: &str) -> Result<(), ConsoleError> {
        let result = self.hand_to_worker(text).await;
        if matches!(
            result,
            Err(ConsoleError::NotConnected(_) | ConsoleError::WorkerGone(_))
        ) {
            self.limiter.release(CONSOLE_SEND);
        }
        result
    }

    async fn hand_to_worker(&self, text: &str) -> Result<(), ConsoleError> {
        let (ack, result) = oneshot::channel();
        self.outbound
            .send(Outbound {
                text: text.to_string(),
                ack,
            })
            .await
            .map_err(|_| ConsoleError::WorkerGone(self.server_id))?;
        result
            .await
            .map_err(|_| ConsoleError::WorkerGone(self.server_id))?
    }

    /// [`admit`](Self::admit) followed by [`transmit`](Self::transmit).
    pub async fn send(&self, text: &str) -> Result<(), ConsoleError> {
        self.admit().await?;
        self.transmit(text).await
    }
}
