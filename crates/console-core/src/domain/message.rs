//! Inbound console messages and their semantic categories.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::server::ServerId;

/// Semantic category assigned to a console line by [`crate::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    /// World save progress.
    Save,
    /// Player chat (global or team).
    Chat,
    /// Authentication / VIP / permission changes.
    Auth,
    /// Player deaths and kills.
    Kill,
    Error,
    Warning,
    /// The server echoing a command it executed.
    CommandEcho,
    /// Player connection announcements.
    PlayerJoin,
    PlayerLeave,
    /// Scheduled or world events (airdrops, KOTH, patrol helicopter, ...).
    Event,
    /// Anything not matched by a more specific rule.
    System,
    /// Synthetic notification emitted when a command receives no response in
    /// time.  Never produced by the classifier.
    CommandTimeout,
}

impl MessageCategory {
    /// Categories that are ordinary gameplay traffic and therefore never
    /// accepted as a command response by the grace-window fallback.
    pub fn is_gameplay_traffic(self) -> bool {
        matches!(
            self,
            MessageCategory::Chat
                | MessageCategory::PlayerJoin
                | MessageCategory::PlayerLeave
                | MessageCategory::Kill
                | MessageCategory::Save
        )
    }
}

/// One line of console output received from a server (or synthesised by the
/// relay for a command timeout).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Process-wide monotonically increasing id; later messages have larger ids.
    pub id: u64,
    pub server_id: ServerId,
    /// Unix milliseconds at which the relay accepted the message.
    pub timestamp: u64,
    pub raw_text: String,
    pub category: MessageCategory,
    pub is_command_response: bool,
    pub correlated_command_id: Option<Uuid>,
}

impl InboundMessage {
    /// Creates an uncorrelated message.
    pub fn new(
        id: u64,
        server_id: ServerId,
        timestamp: u64,
        raw_text: impl Into<String>,
        category: MessageCategory,
    ) -> Self {
        Self {
            id,
            server_id,
            timestamp,
            raw_text: raw_text.into(),
            category,
            is_command_response: false,
            correlated_command_id: None,
        }
    }

    /// Attaches this message to `command_id`.
    ///
    /// Returns `false` (and changes nothing) if the message is already
    /// attached to a command; a message answers at most one command.
    pub fn attach_to(&mut self, command_id: Uuid) -> bool {
        if self.correlated_command_id.is_some() {
            return false;
        }
        self.is_command_response = true;
        self.correlated_command_id = Some(command_id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_to_marks_message_as_response() {
        let mut msg = InboundMessage::new(1, 7, 0, "Hostname: test", MessageCategory::System);
        let id = Uuid::new_v4();

        assert!(msg.attach_to(id));

        assert!(msg.is_command_response);
        assert_eq!(msg.correlated_command_id, Some(id));
    }

    #[test]
    fn test_attach_to_refuses_second_command() {
        let mut msg = InboundMessage::new(1, 7, 0, "ok", MessageCategory::System);
        let first = Uuid::new_v4();
        msg.attach_to(first);

        assert!(!msg.attach_to(Uuid::new_v4()));
        assert_eq!(msg.correlated_command_id, Some(first));
    }

    #[test]
    fn test_category_serializes_snake_case() {
        let json = serde_json::to_string(&MessageCategory::PlayerJoin).unwrap();
        assert_eq!(json, "\"player_join\"");
    }
}
