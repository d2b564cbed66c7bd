//! Domain entities for the console relay.
//!
//! Everything in this module is plain data plus the transitions that are
//! legal on it.  No I/O, no clocks read behind the caller's back.

pub mod command;
pub mod connection;
pub mod message;
pub mod server;

/// Returns the current wall-clock time as Unix milliseconds.
///
/// Used only for the human-facing `timestamp` fields; ordering and expiry
/// decisions always use `std::time::Instant`.
pub fn unix_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
