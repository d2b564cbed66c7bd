//! The error surface of the relay's public API.
//!
//! Every variant is recoverable: callers treat `NotConnected` and
//! `RateLimited` as "try again later", the rest as a failed operation on a
//! relay that keeps running.

use thiserror::Error;
use uuid::Uuid;

use console_core::{ProtocolError, RateLimitExceeded, ServerId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsoleError {
    /// The server has no live upstream session.
    #[error("server {0} is not connected")]
    NotConnected(ServerId),

    /// The outbound rate limit rejected the call.
    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    /// Transport or handshake failure on the upstream socket.
    #[error("connection error for server {server_id}: {reason}")]
    Connection { server_id: ServerId, reason: String },

    /// A frame could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The registry has no region for this server.
    #[error("server {0} is not registered")]
    UnknownServer(ServerId),

    /// The command was dispatched but nothing answered in time.
    #[error("command {command_id} timed out: {text}")]
    CommandTimeout { command_id: Uuid, text: String },

    /// The command text is empty after trimming.
    #[error("refusing to send an empty command")]
    EmptyCommand,

    /// The worker task stopped while the caller was waiting on it.
    #[error("connection worker for server {0} has stopped")]
    WorkerGone(ServerId),
}

impl ConsoleError {
    /// `true` for conditions a caller may retry without changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected(_) | Self::RateLimited(_) | Self::Connection { .. } | Self::WorkerGone(_)
        )
    }
}
