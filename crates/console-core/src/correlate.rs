//! Best-effort command/response correlation.
//!
//! The upstream protocol never echoes a caller-supplied request id, so the
//! relay cannot know for certain which console line answers which command.
//! [`CommandCorrelator`] approximates it with per-command match rules:
//!
//! | Command       | A message answers it when ...                                      |
//! |---------------|---------------------------------------------------------------------|
//! | `serverinfo`  | it contains a configured server-info marker or looks like JSON      |
//! | anything else | it contains the command verb or a configured hint for that verb     |
//! | (fallback)    | it arrives within `grace_window` of the latest dispatch and is not  |
//! |               | chat / join / leave / kill / save traffic                           |
//!
//! Player chat never answers a command, whatever it contains.
//!
//! Pending commands are evaluated earliest-first and the first match wins, so
//! two identical commands in flight on the same server can be answered in
//! the wrong order.  That is inherent to the protocol, not a bug here.
//!
//! One correlator exists per server.  It holds no clock: every operation
//! takes `now`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::domain::command::{CommandOutcome, CommandStatus, PendingCommand};
use crate::domain::message::{InboundMessage, MessageCategory};
use crate::domain::server::ServerId;

/// Tunable thresholds and match hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationConfig {
    /// How long a command may wait for its response.
    pub timeout: Duration,
    /// Window after the latest dispatch during which any non-gameplay message
    /// is accepted as a response.
    pub grace_window: Duration,
    /// Lower-case markers that identify a `serverinfo` payload.
    pub server_info_markers: Vec<String>,
    /// Extra lower-case substrings per command verb.
    pub hints: HashMap<String, Vec<String>>,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        let hints = [
            ("kick", &["kicked"][..]),
            ("ban", &["banned"][..]),
            ("banid", &["banned"][..]),
            ("unban", &["unbanned"][..]),
            ("say", &["[server]"][..]),
            ("status", &["hostname:", "players:"][..]),
            ("players", &["snap updt"][..]),
            ("oxide.reload", &["reloaded", "loaded plugin"][..]),
        ]
        .into_iter()
        .map(|(verb, needles)| {
            (
                verb.to_string(),
                needles.iter().map(|s| s.to_string()).collect(),
            )
        })
        .collect();

        Self {
            timeout: Duration::from_secs(10),
            grace_window: Duration::from_secs(2),
            server_info_markers: ["hostname", "maxplayers", "players", "queued", "gametime", "framerate"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            hints,
        }
    }
}

/// Match rule chosen for a command at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
enum MatchRule {
    ServerInfo,
    Keywords(Vec<String>),
}

impl MatchRule {
    fn for_command(cmd: &PendingCommand, config: &CorrelationConfig) -> Self {
        let verb = cmd.verb();
        if verb == "serverinfo" {
            return MatchRule::ServerInfo;
        }
        let mut needles = Vec::new();
        if !verb.is_empty() {
            needles.push(verb.clone());
        }
        if let Some(extra) = config.hints.get(&verb) {
            needles.extend(extra.iter().cloned());
        }
        MatchRule::Keywords(needles)
    }

    fn matches(&self, lowered: &str, config: &CorrelationConfig) -> bool {
        match self {
            MatchRule::ServerInfo => {
                looks_like_json(lowered)
                    || config
                        .server_info_markers
                        .iter()
                        .any(|m| lowered.contains(m.as_str()))
            }
            MatchRule::Keywords(needles) => needles.iter().any(|n| lowered.contains(n.as_str())),
        }
    }
}

fn looks_like_json(text: &str) -> bool {
    let t = text.trim();
    (t.starts_with('{') && t.ends_with('}')) || (t.starts_with('[') && t.ends_with(']') && t.len() > 2 && t.contains(':'))
}

#[derive(Debug, Clone)]
struct Tracked {
    command: PendingCommand,
    rule: MatchRule,
}

/// Pending-command set for one server.
#[derive(Debug, Clone)]
pub struct CommandCorrelator {
    server_id: ServerId,
    config: CorrelationConfig,
    /// Submission order; earliest first.
    pending: Vec<Tracked>,
    last_dispatch: Option<Instant>,
}

impl CommandCorrelator {
    pub fn new(server_id: ServerId, config: CorrelationConfig) -> Self {
        Self {
            server_id,
            config,
            pending: Vec::new(),
            last_dispatch: None,
        }
    }

    /// Registers a freshly dispatched command and returns its id.
    pub fn register(&mut self, text: impl Into<String>, now: Instant) -> Uuid {
        let command = PendingCommand::new(self.server_id, text, now, self.config.timeout);
        let rule = MatchRule::for_command(&command, &self.config);
        let id = command.command_id;
        self.pending.push(Tracked { command, rule });
        self.last_dispatch = Some(now);
        id
    }

    /// Forgets a command without producing an outcome.
    ///
    /// Used when the transmit itself failed and the caller already received an
    /// error.  Returns `true` if the command was pending.
    pub fn cancel(&mut self, command_id: Uuid) -> bool {
        let before = self.pending.len();
        self.pending.retain(|t| t.command.command_id != command_id);
        self.pending.len() != before
    }

    /// Tries to attach `msg` to the earliest matching non-expired command.
    ///
    /// On a match the message is marked as a response, the command is removed
    /// from the pending set and a [`CommandOutcome::Responded`] is returned.
    /// Messages that are already attached, synthetic timeout notices, chat,
    /// and messages for another server never match.
    pub fn correlate(&mut self, msg: &mut InboundMessage, now: Instant) -> Option<CommandOutcome> {
        if msg.server_id != self.server_id
            || msg.is_command_response
            || matches!(
                msg.category,
                MessageCategory::CommandTimeout | MessageCategory::Chat
            )
        {
            return None;
        }

        let lowered = msg.raw_text.to_lowercase();
        let in_grace = !msg.category.is_gameplay_traffic()
            && self
                .last_dispatch
                .is_some_and(|t| now.saturating_duration_since(t) <= self.config.grace_window);

        let index = self.pending.iter().position(|t| {
            !t.command.is_expired(now) && (in_grace || t.rule.matches(&lowered, &self.config))
        })?;

        let mut tracked = self.pending.remove(index);
        tracked.command.status = CommandStatus::Resolved;
        msg.attach_to(tracked.command.command_id);

        Some(CommandOutcome::Responded {
            command_id: tracked.command.command_id,
            server_id: self.server_id,
            message_id: msg.id,
            round_trip_ms: now
                .saturating_duration_since(tracked.command.submitted_at)
                .as_millis() as u64,
        })
    }

    /// Removes every command whose deadline has passed, marking each
    /// `TimedOut`.  Each command is returned by exactly one sweep.
    pub fn sweep(&mut self, now: Instant) -> Vec<PendingCommand> {
        let (expired, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|t| t.command.is_expired(now));
        self.pending = live;
        expired
            .into_iter()
            .map(|t| {
                let mut cmd = t.command;
                cmd.status = CommandStatus::TimedOut;
                cmd
            })
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Snapshot of the pending commands, earliest first.
    pub fn pending(&self) -> Vec<PendingCommand> {
        self.pending.iter().map(|t| t.command.clone()).collect()
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }
}

/// Text of the synthetic message emitted for a timed-out command.
pub fn timeout_notice(cmd: &PendingCommand) -> String {
    let waited = cmd.expires_at.saturating_duration_since(cmd.submitted_at);
    format!(
        "Command timed out after {}s without a response: {}",
        waited.as_secs(),
        cmd.text
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;

    const SERVER: ServerId = 42;

    fn make_correlator() -> CommandCorrelator {
        CommandCorrelator::new(SERVER, CorrelationConfig::default())
    }

    fn inbound(id: u64, text: &str) -> InboundMessage {
        InboundMessage::new(id, SERVER, 0, text, classify(text))
    }

    #[test]
    fn test_serverinfo_matches_marker_payload_within_timeout() {
        // Arrange
        let mut corr = make_correlator();
        let t0 = Instant::now();
        let id = corr.register("serverinfo", t0);
        let mut msg = inbound(1, "{\n \"Hostname\": \"My Server\",\n \"MaxPlayers\": 100\n}");

        // Act: arrives 1.5s later
        let outcome = corr.correlate(&mut msg, t0 + Duration::from_millis(1_500));

        // Assert
        assert!(matches!(outcome, Some(CommandOutcome::Responded { command_id, round_trip_ms: 1_500, .. }) if command_id == id));
        assert!(msg.is_command_response);
        assert_eq!(msg.correlated_command_id, Some(id));
        assert_eq!(corr.pending_count(), 0);
    }

    #[test]
    fn test_serverinfo_ignores_unrelated_line_after_grace() {
        let mut corr = make_correlator();
        let t0 = Instant::now();
        corr.register("serverinfo", t0);
        let mut msg = inbound(1, "Saving 100 entities");

        let outcome = corr.correlate(&mut msg, t0 + Duration::from_secs(5));

        assert!(outcome.is_none());
        assert!(!msg.is_command_response);
        assert_eq!(corr.pending_count(), 1);
    }

    #[test]
    fn test_keyword_rule_matches_verb_hint() {
        let mut corr = make_correlator();
        let t0 = Instant::now();
        let id = corr.register("kick Bob", t0);
        let mut msg = inbound(1, "Kicked: Bob (cheating)");

        let outcome = corr.correlate(&mut msg, t0 + Duration::from_secs(4));

        assert_eq!(outcome.map(|o| o.command_id()), Some(id));
    }

    #[test]
    fn test_chat_containing_the_verb_is_not_a_response() {
        // Arrange
        let mut corr = make_correlator();
        let t0 = Instant::now();
        corr.register("kick Bob", t0);
        let mut msg = inbound(1, "[CHAT] Alice : kick him");

        // Act
        let outcome = corr.correlate(&mut msg, t0 + Duration::from_secs(3));

        // Assert
        assert!(outcome.is_none());
        assert!(!msg.is_command_response);
        assert_eq!(corr.pending_count(), 1);
    }

    #[test]
    fn test_kick_is_answered_by_the_leave_line() {
        let mut corr = make_correlator();
        let t0 = Instant::now();
        let id = corr.register("kick Bob", t0);
        let mut msg = inbound(1, "Bob[76561198000000001] disconnecting: Kicked: AFK");
        assert_eq!(msg.category, MessageCategory::PlayerLeave);

        let outcome = corr.correlate(&mut msg, t0 + Duration::from_secs(3));

        assert_eq!(outcome.map(|o| o.command_id()), Some(id));
    }

    #[test]
    fn test_players_hint_needs_the_table_header() {
        let mut corr = make_correlator();
        let t0 = Instant::now();
        let id = corr.register("players", t0);
        let later = t0 + Duration::from_secs(3);
        let mut chatter = inbound(1, "did it finally respawn");
        let mut header = inbound(2, "id                name     ping snap updt posi dist");

        assert!(corr.correlate(&mut chatter, later).is_none());
        let outcome = corr.correlate(&mut header, later);

        assert_eq!(outcome.map(|o| o.command_id()), Some(id));
    }

    #[test]
    fn test_grace_window_accepts_any_system_message() {
        let mut corr = make_correlator();
        let t0 = Instant::now();
        let id = corr.register("env.time 12", t0);
        let mut msg = inbound(1, "Time set");

        let outcome = corr.correlate(&mut msg, t0 + Duration::from_millis(500));

        assert_eq!(outcome.map(|o| o.command_id()), Some(id));
    }

    #[test]
    fn test_grace_window_skips_chat_traffic() {
        let mut corr = make_correlator();
        let t0 = Instant::now();
        corr.register("env.time 12", t0);
        let mut msg = inbound(1, "[CHAT] Alice : lol");

        assert!(corr.correlate(&mut msg, t0 + Duration::from_millis(100)).is_none());
    }

    #[test]
    fn test_earliest_pending_command_wins() {
        let mut corr = make_correlator();
        let t0 = Instant::now();
        let first = corr.register("status", t0);
        let second = corr.register("status", t0 + Duration::from_millis(10));
        let mut a = inbound(1, "hostname: test");
        let mut b = inbound(2, "hostname: test");

        let oa = corr.correlate(&mut a, t0 + Duration::from_secs(3));
        let ob = corr.correlate(&mut b, t0 + Duration::from_secs(3));

        assert_eq!(oa.map(|o| o.command_id()), Some(first));
        assert_eq!(ob.map(|o| o.command_id()), Some(second));
    }

    #[test]
    fn test_message_satisfies_at_most_one_command() {
        let mut corr = make_correlator();
        let t0 = Instant::now();
        corr.register("status", t0);
        corr.register("status", t0);
        let mut msg = inbound(1, "hostname: test");

        corr.correlate(&mut msg, t0);
        let again = corr.correlate(&mut msg, t0);

        assert!(again.is_none());
        assert_eq!(corr.pending_count(), 1);
    }

    #[test]
    fn test_expired_command_is_not_matched_but_swept() {
        let mut corr = make_correlator();
        let t0 = Instant::now();
        let id = corr.register("serverinfo", t0);
        let late = t0 + Duration::from_secs(11);
        let mut msg = inbound(1, "{\"Hostname\":\"x\"}");

        assert!(corr.correlate(&mut msg, late).is_none());
        let swept = corr.sweep(late);

        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].command_id, id);
        assert_eq!(swept[0].status, CommandStatus::TimedOut);
    }

    #[test]
    fn test_sweep_returns_each_command_once() {
        let mut corr = make_correlator();
        let t0 = Instant::now();
        corr.register("say hi", t0);
        let later = t0 + Duration::from_secs(30);

        assert_eq!(corr.sweep(later).len(), 1);
        assert!(corr.sweep(later).is_empty());
    }

    #[test]
    fn test_sweep_keeps_live_commands() {
        let mut corr = make_correlator();
        let t0 = Instant::now();
        corr.register("say hi", t0);
        corr.register("say later", t0 + Duration::from_secs(8));

        let swept = corr.sweep(t0 + Duration::from_secs(10));

        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].text, "say hi");
        assert_eq!(corr.pending_count(), 1);
    }

    #[test]
    fn test_resolved_command_never_times_out() {
        let mut corr = make_correlator();
        let t0 = Instant::now();
        corr.register("serverinfo", t0);
        let mut msg = inbound(1, "Hostname: x");
        corr.correlate(&mut msg, t0 + Duration::from_secs(1));

        assert!(corr.sweep(t0 + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn test_cancel_removes_without_outcome() {
        let mut corr = make_correlator();
        let id = corr.register("say hi", Instant::now());
        assert!(corr.cancel(id));
        assert!(!corr.cancel(id));
        assert_eq!(corr.pending_count(), 0);
    }

    #[test]
    fn test_timeout_notice_references_command_text() {
        let cmd = PendingCommand::new(SERVER, "say hello", Instant::now(), Duration::from_secs(10));
        let notice = timeout_notice(&cmd);
        assert!(notice.contains("say hello"));
        assert!(notice.contains("10s"));
    }
}
