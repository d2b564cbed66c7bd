//! # console-core
//!
//! Shared library for the game-server console relay containing the domain
//! entities, the inbound message classifier, bounded message buffering,
//! command/response correlation, rate-limit windows, and the upstream wire
//! format.
//!
//! This crate has zero dependencies on sockets, async runtimes, or the file
//! system.  Every function that needs "the current time" takes it as an
//! argument, so all behaviour is deterministic under test.
//!
//! # Architecture overview
//!
//! The relay keeps one persistent socket per managed game server open to an
//! upstream message-push service.  Console output flows in, operator commands
//! flow out:
//!
//! ```text
//!  upstream frame ──► protocol::parse_inbound ──► classify ──► AnnouncementFilter
//!                                                                  │
//!                                      CommandCorrelator ◄─────────┘
//!                                              │
//!                                        MessageBuffer
//! ```
//!
//! - **`domain`** – Server identities, the connection state machine, inbound
//!   messages and pending commands.
//! - **`classify`** – Pure text → [`MessageCategory`] function.
//! - **`buffer`** – Bounded FIFO history and spam suppression.
//! - **`correlate`** – Best-effort matching of responses to commands.
//! - **`rate_limit`** – Sliding-window call accounting.
//! - **`protocol`** – Outbound frame builders and the tolerant inbound parser.

pub mod buffer;
pub mod classify;
pub mod correlate;
pub mod domain;
pub mod protocol;
pub mod rate_limit;

pub use buffer::{AnnouncementFilter, MessageBuffer};
pub use classify::classify;
pub use correlate::{CommandCorrelator, CorrelationConfig};
pub use domain::command::{CommandOutcome, CommandStatus, PendingCommand};
pub use domain::connection::{
    BackoffPolicy, ConnectionState, ConnectionStatus, ServerConnection, TransitionError,
};
pub use domain::message::{InboundMessage, MessageCategory};
pub use domain::server::{Region, ServerId};
pub use protocol::{parse_inbound, InboundFrame, ProtocolError};
pub use rate_limit::{RateLimitExceeded, RateLimiter};
