//! Per-server console state and the inbound pipeline.
//!
//! Every accepted line goes through the same steps, under one lock:
//!
//! ```text
//! raw line ─► classify ─► join-spam filter ─► assign id ─► correlate ─► buffer
//!                               │ suppressed                    │ match
//!                               ▼                               ▼
//!                             dropped                   CommandOutcome broadcast
//! ```
//!
//! The lock is a plain `std::sync::Mutex`.  Nothing awaits while holding it,
//! and the periodic sweep takes the same lock, so a message and a timeout can
//! never both claim one command.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use console_core::correlate::timeout_notice;
use console_core::domain::unix_millis;
use console_core::{
    classify, AnnouncementFilter, CommandCorrelator, CommandOutcome, CorrelationConfig,
    InboundMessage, MessageBuffer, MessageCategory, ServerId,
};

const LIVE_CHANNEL_CAPACITY: usize = 1024;
const OUTCOME_CHANNEL_CAPACITY: usize = 256;

/// Receives console lines from connection workers.
pub trait InboundSink: Send + Sync {
    fn deliver(&self, server_id: ServerId, line: String);
}

struct ServerConsole {
    buffer: MessageBuffer,
    announcements: AnnouncementFilter,
    correlator: CommandCorrelator,
}

/// All per-server console state of one relay.
pub struct ConsoleStore {
    servers: Mutex<HashMap<ServerId, ServerConsole>>,
    next_id: AtomicU64,
    buffer_capacity: usize,
    announcement_cooldown: Duration,
    correlation: CorrelationConfig,
    live: broadcast::Sender<InboundMessage>,
    outcomes: broadcast::Sender<CommandOutcome>,
}

impl ConsoleStore {
    pub fn new(
        buffer_capacity: usize,
        announcement_cooldown: Duration,
        correlation: CorrelationConfig,
    ) -> Self {
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        Self {
            servers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer_capacity,
            announcement_cooldown,
            correlation,
            live,
            outcomes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ServerId, ServerConsole>> {
        self.servers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn console<'a>(
        &self,
        servers: &'a mut HashMap<ServerId, ServerConsole>,
        server_id: ServerId,
    ) -> &'a mut ServerConsole {
        servers.entry(server_id).or_insert_with(|| ServerConsole {
            buffer: MessageBuffer::new(self.buffer_capacity),
            announcements: AnnouncementFilter::new(self.announcement_cooldown),
            correlator: CommandCorrelator::new(server_id, self.correlation.clone()),
        })
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Runs one raw console line through the pipeline.
    ///
    /// Returns the buffered message, or `None` if the join-spam filter
    /// suppressed it.
    pub fn accept_line(
        &self,
        server_id: ServerId,
        raw_text: &str,
        now: Instant,
    ) -> Option<InboundMessage> {
        let category = classify(raw_text);

        let (msg, outcome) = {
            let mut servers = self.lock();
            let console = self.console(&mut servers, server_id);

            if !console.announcements.should_emit(raw_text, category, now) {
                debug!(server_id, "suppressed repeated join announcement");
                return None;
            }

            let mut msg =
                InboundMessage::new(self.next_id(), server_id, unix_millis(), raw_text, category);
            let outcome = console.correlator.correlate(&mut msg, now);
            console.buffer.push(msg.clone());
            (msg, outcome)
        };

        if let Some(outcome) = outcome {
            debug!(server_id, command_id = %outcome.command_id(), message_id = msg.id, "command response correlated");
            let _ = self.outcomes.send(outcome);
        }
        let _ = self.live.send(msg.clone());
        Some(msg)
    }

    /// Opens a pending command for `server_id` and returns its id.
    pub fn register_command(&self, server_id: ServerId, text: &str, now: Instant) -> Uuid {
        let mut servers = self.lock();
        self.console(&mut servers, server_id)
            .correlator
            .register(text, now)
    }

    /// Drops a pending command without an outcome.
    pub fn cancel_command(&self, server_id: ServerId, command_id: Uuid) -> bool {
        self.lock()
            .get_mut(&server_id)
            .is_some_and(|c| c.correlator.cancel(command_id))
    }

    /// Expires overdue commands on every server.
    ///
    /// Each expired command yields one synthetic `command_timeout` message in
    /// its server's buffer and one [`CommandOutcome::TimedOut`].  Returns the
    /// synthetic messages.
    pub fn sweep(&self, now: Instant) -> Vec<InboundMessage> {
        let mut notices = Vec::new();
        let mut outcomes = Vec::new();
        {
            let mut servers = self.lock();
            for (&server_id, console) in servers.iter_mut() {
                for cmd in console.correlator.sweep(now) {
                    warn!(
                        server_id,
                        command_id = %cmd.command_id,
                        command = %cmd.text,
                        "command timed out without a response"
                    );
                    let msg = InboundMessage::new(
                        self.next_id(),
                        server_id,
                        unix_millis(),
                        timeout_notice(&cmd),
                        MessageCategory::CommandTimeout,
                    );
                    console.buffer.push(msg.clone());
                    outcomes.push(CommandOutcome::TimedOut {
                        command_id: cmd.command_id,
                        server_id,
                        text: cmd.text,
                    });
                    notices.push(msg);
                }
            }
        }

        for outcome in outcomes {
            let _ = self.outcomes.send(outcome);
        }
        for msg in &notices {
            let _ = self.live.send(msg.clone());
        }
        notices
    }

    /// Buffered messages, oldest first.
    ///
    /// - `server_id = None` merges every server, ordered by id.
    /// - Without `after_id`: the newest `limit` messages.
    /// - With `after_id`: the first `limit` messages whose id is greater.
    pub fn messages(
        &self,
        server_id: Option<ServerId>,
        limit: usize,
        after_id: Option<u64>,
    ) -> Vec<InboundMessage> {
        let servers = self.lock();
        let window = |console: &ServerConsole| match after_id {
            Some(after) => console.buffer.since(after, limit),
            None => console.buffer.latest(limit),
        };

        match server_id {
            Some(id) => servers.get(&id).map(window).unwrap_or_default(),
            None => {
                let mut merged: Vec<InboundMessage> = servers.values().flat_map(window).collect();
                merged.sort_by_key(|m| m.id);
                if after_id.is_some() {
                    merged.truncate(limit);
                } else if merged.len() > limit {
                    merged.drain(..merged.len() - limit);
                }
                merged
            }
        }
    }

    /// One buffered message by id.
    pub fn message(&self, server_id: ServerId, id: u64) -> Option<InboundMessage> {
        self.lock()
            .get(&server_id)?
            .buffer
            .since(id.saturating_sub(1), 1)
            .into_iter()
            .find(|m| m.id == id)
    }

    /// Commands still awaiting a response on `server_id`.
    pub fn pending_count(&self, server_id: ServerId) -> usize {
        self.lock()
            .get(&server_id)
            .map_or(0, |c| c.correlator.pending_count())
    }

    /// Buffered message count of `server_id`.
    pub fn buffered(&self, server_id: ServerId) -> usize {
        self.lock().get(&server_id).map_or(0, |c| c.buffer.len())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.live.subscribe()
    }

    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<CommandOutcome> {
        self.outcomes.subscribe()
    }
}

impl InboundSink for ConsoleStore {
    fn deliver(&self, server_id: ServerId, line: String) {
        self.accept_line(server_id, &line, Instant::now());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
