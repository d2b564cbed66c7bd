//! Spam suppression for player-join announcements.
//!
//! Busy servers print a connection announcement every time a player's client
//! reconnects, which can be several times a minute for a flaky connection.
//! [`AnnouncementFilter`] keeps the first announcement for a player and drops
//! repeats until `cooldown` has passed since the last one that was emitted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::domain::message::MessageCategory;

/// Default suppression window for repeated announcements.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Length of a SteamID64.
const STEAM_ID_LEN: usize = 17;

/// Extracts the identifier a join announcement refers to.
///
/// Prefers the first 17-digit run (a SteamID64); otherwise uses the text in
/// front of `" joined"` / `" has entered"`, taking the last `/`-separated
/// segment so `ip:port/steamid/name` prefixes collapse to the name.
/// Returns `None` when no identifier can be found.
pub fn announcement_key(raw_text: &str) -> Option<String> {
    if let Some(id) = first_digit_run(raw_text, STEAM_ID_LEN) {
        return Some(id.to_string());
    }

    let lowered = raw_text.to_lowercase();
    let end = [" joined", " has entered"]
        .iter()
        .filter_map(|marker| lowered.find(marker))
        .min()?;
    let name = raw_text.get(..end)?.rsplit('/').next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_lowercase())
    }
}

/// Returns the first run of exactly `len` ASCII digits.
fn first_digit_run(text: &str, len: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut start = None;
    for (i, b) in bytes.iter().enumerate().chain(std::iter::once((bytes.len(), &b' '))) {
        match (b.is_ascii_digit(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                if i - s == len {
                    return text.get(s..i);
                }
                start = None;
            }
            _ => {}
        }
    }
    None
}

/// Per-server cooldown tracker for join announcements.
#[derive(Debug, Clone)]
pub struct AnnouncementFilter {
    cooldown: Duration,
    last_emitted: HashMap<String, Instant>,
}

impl Default for AnnouncementFilter {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl AnnouncementFilter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_emitted: HashMap::new(),
        }
    }

    /// Decides whether a classified message should be kept.
    ///
    /// Messages outside the `PlayerJoin` category, and announcements without
    /// an extractable identifier, are always kept.  An announcement that is
    /// kept resets the cooldown clock for its identifier; a suppressed one
    /// does not.
    pub fn should_emit(&mut self, raw_text: &str, category: MessageCategory, now: Instant) -> bool {
        if category != MessageCategory::PlayerJoin {
            return true;
        }
        let Some(key) = announcement_key(raw_text) else {
            return true;
        };

        self.prune(now);
        match self.last_emitted.get(&key) {
            Some(&last) if now.saturating_duration_since(last) < self.cooldown => false,
            _ => {
                self.last_emitted.insert(key, now);
                true
            }
        }
    }

    /// Number of identifiers currently inside their cooldown window.
    pub fn tracked(&self) -> usize {
        self.last_emitted.len()
    }

    /// Forgets identifiers whose cooldown has elapsed so the map stays small.
    fn prune(&mut self, now: Instant) {
        let cooldown = self.cooldown;
        self.last_emitted
            .retain(|_, last| now.saturating_duration_since(*last) < cooldown);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
