//! Upstream wire format.
//!
//! The upstream control plane speaks GraphQL over WebSocket text frames:
//!
//! - **Outbound** ([`outbound`]) – the session handshake (`connection_init`
//!   and the `consoleMessages` subscription) and the bit-exact
//!   `sendConsoleMessage` command envelope.
//! - **Inbound** ([`inbound`]) – a tolerant parser that accepts any JSON
//!   envelope and extracts what it recognises, ignoring unknown fields.

pub mod inbound;
pub mod outbound;

use thiserror::Error;

pub use inbound::{parse_inbound, InboundFrame};
pub use outbound::{command_frame, connection_init_frame, subscribe_frame, SUBSCRIPTION_ID};

/// Errors produced while encoding or decoding upstream frames.
///
/// A decode error affects only the frame it came from; the session carries on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame is not valid JSON.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A frame could not be serialised.
    #[error("failed to encode frame: {0}")]
    Encode(String),
}
