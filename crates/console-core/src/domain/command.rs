//! Outbound commands awaiting a response.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::server::ServerId;

/// Lifecycle of a [`PendingCommand`].  Leaves `Pending` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Resolved,
    TimedOut,
}

/// A command that has been dispatched to a server and not yet answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub command_id: Uuid,
    pub server_id: ServerId,
    pub text: String,
    pub submitted_at: Instant,
    pub expires_at: Instant,
    pub status: CommandStatus,
}

impl PendingCommand {
    /// Creates a `Pending` command with a fresh v4 id.
    pub fn new(server_id: ServerId, text: impl Into<String>, now: Instant, timeout: Duration) -> Self {
        Self {
            command_id: Uuid::new_v4(),
            server_id,
            text: text.into(),
            submitted_at: now,
            expires_at: now + timeout,
            status: CommandStatus::Pending,
        }
    }

    /// `true` once `now` has reached `expires_at`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Lower-cased first word of the command (`"serverinfo"`, `"kick"`, ...).
    pub fn verb(&self) -> String {
        self.text
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }
}

/// Terminal outcome of a dispatched command, broadcast exactly once per command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// An inbound message was correlated to the command.
    Responded {
        command_id: Uuid,
        server_id: ServerId,
        message_id: u64,
        /// Milliseconds between dispatch and the correlated message.
        round_trip_ms: u64,
    },
    /// No response arrived before the command expired.
    TimedOut {
        command_id: Uuid,
        server_id: ServerId,
        text: String,
    },
}

impl CommandOutcome {
    pub fn command_id(&self) -> Uuid {
        match self {
            CommandOutcome::Responded { command_id, .. }
            | CommandOutcome::TimedOut { command_id, .. } => *command_id,
        }
    }
}
