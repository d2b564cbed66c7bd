//! Inbound console line classifier.
//!
//! [`classify`] maps raw console text to a [`MessageCategory`] by walking an
//! ordered rule table and returning the category of the first rule with a
//! matching marker.  Matching is case-insensitive substring search.
//!
//! # Why ordered?
//!
//! Console lines frequently contain markers for several categories at once
//! (`"[CHAT] bob: saving my loot"`).  A fixed order makes the result
//! deterministic: the earlier rule wins.  The order mirrors how specific the
//! markers are, from the unambiguous save/chat tags down to the loose
//! event keywords.
//!
//! The function is total: every input, including the empty string, maps to a
//! category (`System` when nothing matches).

use crate::domain::message::MessageCategory;

/// Ordered `(category, markers)` rules.  Markers must be lower-case.
const RULES: &[(MessageCategory, &[&str])] = &[
    (
        MessageCategory::Save,
        &["saving ", "saved ", "save complete", "[save]"],
    ),
    (
        MessageCategory::Chat,
        &["[chat]", "[team chat]", "[global chat]", "[teamchat]"],
    ),
    (
        MessageCategory::Auth,
        &["[vip]", "vip ", "authlevel", "ownerid", "moderatorid", "[auth]"],
    ),
    (
        MessageCategory::Kill,
        &[" was killed by ", " killed ", " died ", "[kill]"],
    ),
    (
        MessageCategory::Error,
        &["error", "exception", "failed"],
    ),
    (
        MessageCategory::Warning,
        &["warning", "[warn]"],
    ),
    (
        MessageCategory::CommandEcho,
        &["[serverconsole]", "[rcon]", "executing command", "command executed"],
    ),
    (
        MessageCategory::PlayerJoin,
        &[" joined [", " has entered the game", " connected"],
    ),
    (
        MessageCategory::PlayerLeave,
        &[" disconnecting:", " has left", " disconnected"],
    ),
    (
        MessageCategory::Event,
        &["[event]", "koth", "airdrop", "cargo ship", "patrol helicopter", "bradley"],
    ),
];

/// Classifies one console line.
///
/// Pure, total and deterministic.
///
/// # Example
///
/// ```rust
/// use console_core::{classify, MessageCategory};
///
/// assert_eq!(classify("[CHAT] bob : hello"), MessageCategory::Chat);
/// assert_eq!(classify("anything else"), MessageCategory::System);
/// ```
pub fn classify(raw_text: &str) -> MessageCategory {
    let lowered = raw_text.to_lowercase();
    RULES
        .iter()
        .find(|(_, markers)| markers.iter().any(|m| lowered.contains(m)))
        .map(|(category, _)| *category)
        .unwrap_or(MessageCategory::System)
}
