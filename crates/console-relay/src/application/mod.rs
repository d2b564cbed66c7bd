//! Application layer: what happens to console traffic once it is off the wire.
//!
//! - [`console_state`] – per-server buffers, join-spam filters and command
//!   correlators behind one lock, plus the live broadcast channels.
//! - [`rate_limiter`] – the outbound sliding-window limiter shared by every
//!   connection.

pub mod console_state;
pub mod rate_limiter;

pub use console_state::{ConsoleStore, InboundSink};
pub use rate_limiter::{SharedRateLimiter, CONSOLE_SEND};
