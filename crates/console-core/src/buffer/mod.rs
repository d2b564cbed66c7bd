//! Bounded per-server message history and spam suppression.
//!
//! - [`MessageBuffer`] – FIFO of at most `capacity` messages; pushing onto a
//!   full buffer silently evicts the oldest message.
//! - [`AnnouncementFilter`] – drops repeated player-join announcements for the
//!   same player inside a cooldown window.
//!
//! Neither type synchronises internally.  The relay keeps them behind a mutex
//! together with the correlator so that the receive loop, the timeout sweep
//! and API readers observe one consistent view.

pub mod announce;
pub mod ring;

pub use announce::{announcement_key, AnnouncementFilter};
pub use ring::MessageBuffer;
