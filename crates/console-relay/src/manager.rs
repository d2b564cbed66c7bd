//! The operator-facing facade.
//!
//! [`ConsoleManager`] is the only type an embedding application needs.  It
//! owns one [`ConnectionSupervisor`], one [`ConsoleStore`], one shared rate
//! limiter and the timeout sweeper task; there is no global state.
//!
//! # Sending a command
//!
//! ```text
//! send(server, text)
//!   ├─ handle.admit()         NotConnected / RateLimited
//!   ├─ store.register_command pending command opened, id returned later
//!   ├─ handle.transmit()      worker writes the frame and acknowledges
//!   │     ├─ frame never written: rate-limit slot given back
//!   │     └─ on error: store.cancel_command, error returned
//!   └─ Ok(command_id)         outcome follows on subscribe_outcomes()
//! ```
//!
//! The command is registered before the frame leaves, so a fast reply can
//! never arrive ahead of its pending entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use console_core::domain::unix_millis;
use console_core::{
    CommandOutcome, ConnectionState, ConnectionStatus, InboundMessage, Region, ServerId,
};

use crate::application::{ConsoleStore, InboundSink, SharedRateLimiter, CONSOLE_SEND};
use crate::domain::{ConsoleConfig, ConsoleError, ServerRegistry};
use crate::infrastructure::{ConnectionSupervisor, SupervisorSettings, UpstreamConnector, WsConnector};

/// Command sent to every connected server by [`ConsoleManager::test`].
pub const PROBE_COMMAND: &str = "serverinfo";

/// Result of [`ConsoleManager::connect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResult {
    /// `true` when the first attempt reached `Connected`.  A `false` result
    /// still leaves a worker retrying in the background.
    pub success: bool,
    pub status: ConnectionStatus,
}

/// Reply to a command awaited with [`ConsoleManager::execute`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub command_id: Uuid,
    pub round_trip_ms: u64,
    /// The correlated message; `None` if it already left the buffer.
    pub message: Option<InboundMessage>,
}

/// How one server answered the diagnostic probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Responded { command_id: Uuid },
    TimedOut { command_id: Uuid },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub server_id: ServerId,
    pub state: ConnectionState,
    #[serde(flatten)]
    pub outcome: ProbeOutcome,
    pub round_trip_ms: Option<u64>,
}

/// Report produced by [`ConsoleManager::test`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    /// `true` when every probed server responded (vacuously true for none).
    pub success: bool,
    /// Unix milliseconds at which the probe finished.
    pub checked_at: u64,
    pub servers: Vec<ProbeResult>,
}

/// Multi-server console relay.
pub struct ConsoleManager {
    config: ConsoleConfig,
    registry: Arc<dyn ServerRegistry>,
    store: Arc<ConsoleStore>,
    limiter: Arc<SharedRateLimiter>,
    supervisor: ConnectionSupervisor,
    sweeper: JoinHandle<()>,
}

impl ConsoleManager {
    /// Builds a relay on top of `connector` and starts the timeout sweeper.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: ConsoleConfig,
        connector: Arc<dyn UpstreamConnector>,
        registry: Arc<dyn ServerRegistry>,
    ) -> Self {
        let store = Arc::new(ConsoleStore::new(
            config.buffer_capacity,
            config.announcement_cooldown,
            config.correlation.clone(),
        ));
        let limiter = Arc::new(SharedRateLimiter::new(
            config.rate_limit_window,
            config.rate_limit_max_calls,
            config.rate_limit_mode,
        ));
        let sink: Arc<dyn InboundSink> = store.clone();
        let supervisor = ConnectionSupervisor::new(
            connector,
            sink,
            Arc::clone(&limiter),
            SupervisorSettings::from(&config),
        );
        let sweeper = tokio::spawn(sweep_loop(Arc::clone(&store), config.sweep_interval));

        Self {
            config,
            registry,
            store,
            limiter,
            supervisor,
            sweeper,
        }
    }

    /// Builds a relay that talks to the configured WebSocket endpoint.
    pub fn with_websocket(config: ConsoleConfig, registry: Arc<dyn ServerRegistry>) -> Self {
        let connector = Arc::new(WsConnector::from_config(&config));
        Self::new(config, connector, registry)
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    /// Opens (or reuses) the upstream session of `server_id`.
    ///
    /// Idempotent: while a worker exists for the server, no second socket is
    /// opened and the existing status is returned.
    pub async fn connect(&self, server_id: ServerId, region: Region) -> ConnectResult {
        let status = self.supervisor.connect(server_id, region).await;
        ConnectResult {
            success: status.state == ConnectionState::Connected,
            status,
        }
    }

    /// [`connect`](Self::connect) with the region looked up in the registry.
    ///
    /// # Errors
    ///
    /// [`ConsoleError::UnknownServer`] if the registry does not know the server.
    pub async fn connect_registered(&self, server_id: ServerId) -> Result<ConnectResult, ConsoleError> {
        let region = self
            .registry
            .region_of(server_id)
            .ok_or(ConsoleError::UnknownServer(server_id))?;
        Ok(self.connect(server_id, region).await)
    }

    /// Closes the session of `server_id` and stops reconnecting.
    ///
    /// Buffered history stays readable; pending commands run into their
    /// timeout as usual.
    ///
    /// # Errors
    ///
    /// [`ConsoleError::NotConnected`] if the server has no worker.
    pub async fn disconnect(&self, server_id: ServerId) -> Result<(), ConsoleError> {
        self.supervisor.disconnect(server_id).await
    }

    /// Status of one server, or of every supervised server.
    pub fn status(&self, server_id: Option<ServerId>) -> Vec<ConnectionStatus> {
        self.supervisor.status(server_id)
    }

    /// Sends `text` to the console of `server_id`.
    ///
    /// Returns the id under which the command's outcome will be reported.
    ///
    /// # Errors
    ///
    /// - [`ConsoleError::EmptyCommand`] for blank text.
    /// - [`ConsoleError::NotConnected`] when the session is not live.
    /// - [`ConsoleError::RateLimited`] in reject mode with a full window.
    /// - [`ConsoleError::Connection`] / [`ConsoleError::WorkerGone`] if the
    ///   write did not happen.
    pub async fn send(&self, server_id: ServerId, text: &str) -> Result<Uuid, ConsoleError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ConsoleError::EmptyCommand);
        }
        let handle = self
            .supervisor
            .handle(server_id)
            .ok_or(ConsoleError::NotConnected(server_id))?;

        handle.admit().await?;
        let command_id = self.store.register_command(server_id, text, Instant::now());

        if let Err(e) = handle.transmit(text).await {
            self.store.cancel_command(server_id, command_id);
            debug!(server_id, %command_id, "command not sent: {e}");
            return Err(e);
        }
        info!(server_id, %command_id, command = text, "command dispatched");
        Ok(command_id)
    }

    /// Sends `text` and waits for its terminal outcome.
    ///
    /// # Errors
    ///
    /// Everything [`send`](Self::send) returns, plus
    /// [`ConsoleError::CommandTimeout`] when no response was correlated.
    pub async fn execute(&self, server_id: ServerId, text: &str) -> Result<CommandReply, ConsoleError> {
        let mut outcomes = self.store.subscribe_outcomes();
        let command_id = self.send(server_id, text).await?;

        loop {
            let outcome = match outcomes.recv().await {
                Ok(outcome) if outcome.command_id() == command_id => outcome,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return Err(ConsoleError::WorkerGone(server_id)),
            };
            return match outcome {
                CommandOutcome::Responded {
                    message_id,
                    round_trip_ms,
                    ..
                } => Ok(CommandReply {
                    command_id,
                    round_trip_ms,
                    message: self.store.message(server_id, message_id),
                }),
                CommandOutcome::TimedOut { text, .. } => {
                    Err(ConsoleError::CommandTimeout { command_id, text })
                }
            };
        }
    }

    /// Buffered messages, oldest first.
    ///
    /// Without `after_id`, the newest `limit`; with it, the first `limit`
    /// messages newer than `after_id`.  `server_id = None` merges all servers
    /// ordered by id.
    pub fn messages(
        &self,
        server_id: Option<ServerId>,
        limit: usize,
        after_id: Option<u64>,
    ) -> Vec<InboundMessage> {
        self.store.messages(server_id, limit, after_id)
    }

    /// Sends [`PROBE_COMMAND`] to every connected server and waits for each
    /// outcome.
    pub async fn test(&self) -> DiagnosticReport {
        let mut outcomes = self.store.subscribe_outcomes();
        let mut results = Vec::new();
        let mut waiting: HashMap<Uuid, (ServerId, ConnectionState)> = HashMap::new();

        for status in self.status(None) {
            if status.state != ConnectionState::Connected {
                continue;
            }
            match self.send(status.server_id, PROBE_COMMAND).await {
                Ok(command_id) => {
                    waiting.insert(command_id, (status.server_id, status.state));
                }
                Err(e) => results.push(ProbeResult {
                    server_id: status.server_id,
                    state: status.state,
                    outcome: ProbeOutcome::Failed {
                        reason: e.to_string(),
                    },
                    round_trip_ms: None,
                }),
            }
        }

        let deadline =
            self.config.correlation.timeout + self.config.sweep_interval + Duration::from_secs(1);
        let _ = timeout(deadline, async {
            while !waiting.is_empty() {
                let outcome = match outcomes.recv().await {
                    Ok(outcome) => outcome,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                };
                let Some((server_id, state)) = waiting.remove(&outcome.command_id()) else {
                    continue;
                };
                results.push(probe_result(server_id, state, &outcome));
            }
        })
        .await;

        for (command_id, (server_id, state)) in waiting {
            results.push(ProbeResult {
                server_id,
                state,
                outcome: ProbeOutcome::TimedOut { command_id },
                round_trip_ms: None,
            });
        }
        results.sort_by_key(|r| r.server_id);

        DiagnosticReport {
            success: results
                .iter()
                .all(|r| matches!(r.outcome, ProbeOutcome::Responded { .. })),
            checked_at: unix_millis(),
            servers: results,
        }
    }

    /// Live feed of every accepted message, including timeout notices.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.store.subscribe()
    }

    /// Terminal outcome of every dispatched command.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<CommandOutcome> {
        self.store.subscribe_outcomes()
    }

    /// Commands of `server_id` still awaiting a response.
    pub fn pending_commands(&self, server_id: ServerId) -> usize {
        self.store.pending_count(server_id)
    }

    /// `console.send` calls in the current rate-limit window.
    pub fn rate_limit_usage(&self) -> usize {
        self.limiter.stats(CONSOLE_SEND)
    }

    /// Disconnects every server and stops the sweeper.
    pub async fn shutdown(&self) {
        self.sweeper.abort();
        self.supervisor.shutdown().await;
        info!("console relay shut down");
    }
}

impl Drop for ConsoleManager {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

fn probe_result(server_id: ServerId, state: ConnectionState, outcome: &CommandOutcome) -> ProbeResult {
    match outcome {
        CommandOutcome::Responded {
            command_id,
            round_trip_ms,
            ..
        } => ProbeResult {
            server_id,
            state,
            outcome: ProbeOutcome::Responded {
                command_id: *command_id,
            },
            round_trip_ms: Some(*round_trip_ms),
        },
        CommandOutcome::TimedOut { command_id, .. } => ProbeResult {
            server_id,
            state,
            outcome: ProbeOutcome::TimedOut {
                command_id: *command_id,
            },
            round_trip_ms: None,
        },
    }
}

async fn sweep_loop(store: Arc<ConsoleStore>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let expired = store.sweep(Instant::now());
        if !expired.is_empty() {
            debug!(count = expired.len(), "timeout sweep expired commands");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::domain::registry::MockServerRegistry;
    use crate::infrastructure::{TransportError, UpstreamLink};

    /// Connector whose upstream never accepts a connection.
    struct Unreachable;

    #[async_trait]
    impl UpstreamConnector for Unreachable {
        async fn open(&self, _: ServerId, _: Region) -> Result<UpstreamLink, TransportError> {
            Err(TransportError("connection refused".to_string()))
        }
    }

    fn manager(registry: MockServerRegistry) -> ConsoleManager {
        let config = ConsoleConfig {
            backoff: console_core::BackoffPolicy {
                base: Duration::from_secs(30),
                cap: Duration::from_secs(30),
                jitter: Duration::ZERO,
            },
            ..ConsoleConfig::default()
        };
        ConsoleManager::new(config, Arc::new(Unreachable), Arc::new(registry))
    }

    #[tokio::test]
    async fn test_connect_registered_unknown_server() {
        // Arrange
        let mut registry = MockServerRegistry::new();
        registry.expect_region_of().returning(|_| None);
        let relay = manager(registry);

        // Act
        let result = relay.connect_registered(99).await;

        // Assert
        assert_eq!(result, Err(ConsoleError::UnknownServer(99)));
        assert!(relay.status(None).is_empty());
    }

    #[tokio::test]
    async fn test_connect_registered_uses_registry_region() {
        let mut registry = MockServerRegistry::new();
        registry
            .expect_region_of()
            .withf(|id| *id == 42)
            .times(1)
            .returning(|_| Some(Region::Eu));
        let relay = manager(registry);

        let result = relay.connect_registered(42).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.status.region, Some(Region::Eu));
        assert_eq!(result.status.state, ConnectionState::Reconnecting);
        assert!(result.status.last_error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_send_to_unconnected_server_fails() {
        let relay = manager(MockServerRegistry::new());
        assert_eq!(relay.send(5, "status").await, Err(ConsoleError::NotConnected(5)));
    }

    #[tokio::test]
    async fn test_blank_command_is_rejected() {
        let relay = manager(MockServerRegistry::new());
        assert_eq!(relay.send(5, "   ").await, Err(ConsoleError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_send_while_reconnecting_is_not_connected() {
        let relay = manager(MockServerRegistry::new());
        relay.connect(5, Region::Us).await;

        assert_eq!(relay.send(5, "status").await, Err(ConsoleError::NotConnected(5)));
        assert_eq!(relay.pending_commands(5), 0);
    }

    #[tokio::test]
    async fn test_test_with_no_connected_servers_is_successful_and_empty() {
        let relay = manager(MockServerRegistry::new());
        let report = relay.test().await;
        assert!(report.success);
        assert!(report.servers.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_during_backoff_is_prompt() {
        let relay = manager(MockServerRegistry::new());
        relay.connect(5, Region::As).await;

        let started = Instant::now();
        relay.disconnect(5).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(relay.status(Some(5))[0].state, ConnectionState::Disconnected);
        assert_eq!(relay.disconnect(5).await, Err(ConsoleError::NotConnected(5)));
    }

    #[test]
    fn test_probe_result_serialises_flat() {
        let result = ProbeResult {
            server_id: 1,
            state: ConnectionState::Connected,
            outcome: ProbeOutcome::Failed {
                reason: "nope".to_string(),
            },
            round_trip_ms: None,
        };
        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(v["outcome"], "failed");
        assert_eq!(v["reason"], "nope");
        assert_eq!(v["state"], "connected");
    }
}
