//! Per-server connection state machine and reconnect backoff.
//!
//! # Connection lifecycle
//!
//! ```text
//!                 begin_connect            mark_connected
//! Disconnected ─────────────────► Connecting ─────────────► Connected
//!                                   ▲    │                      │
//!                     begin_connect │    │ mark_failed          │ mark_failed
//!                                   │    ▼                      │
//!                                 Reconnecting ◄────────────────┘
//! ```
//!
//! `mark_disconnected` is legal from every state and always lands in
//! `Disconnected`.  `mark_failed` returns the delay the caller must wait
//! before calling `begin_connect` again.
//!
//! The struct is deliberately free of sockets and timers: the supervisor's
//! worker task drives it, and tests drive it directly.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::server::{Region, ServerId};

/// Lifecycle state of one upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket and no worker.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Handshake complete; frames flowing.
    Connected,
    /// Last attempt failed; waiting out the backoff delay.
    Reconnecting,
}

impl ConnectionState {
    /// `true` for every state in which a worker task owns the connection.
    pub fn is_active(self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }
}

/// Returned when a transition is requested from a state that does not allow it.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal connection transition for server {server_id}: {from:?} -> {to:?}")]
pub struct TransitionError {
    pub server_id: ServerId,
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Exponential reconnect backoff: `min(base * 2^attempts, cap) + jitter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound for the exponential part.
    pub cap: Duration,
    /// Maximum random jitter added on top of the capped delay.
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(60),
            jitter: Duration::from_millis(500),
        }
    }
}

impl BackoffPolicy {
    /// The deterministic part of the delay for the given number of prior
    /// failed attempts.
    ///
    /// Non-decreasing in `attempts` and never above `cap`.
    pub fn base_delay(&self, attempts: u32) -> Duration {
        // 2^attempts overflows quickly; anything past 2^20 is far beyond any
        // sane cap anyway.
        let factor = 1u32 << attempts.min(20);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// [`base_delay`](Self::base_delay) plus uniform jitter in `[0, jitter]`.
    pub fn delay(&self, attempts: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.base_delay(attempts) + jitter
    }
}

/// Serialisable snapshot of a [`ServerConnection`], handed out by `status()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub server_id: ServerId,
    /// `None` only for servers the relay has never been asked to connect.
    pub region: Option<Region>,
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    /// Unix milliseconds at which the connection record was created.
    pub created_at: Option<u64>,
}

impl ConnectionStatus {
    /// Snapshot for a server that has no connection record.
    pub fn disconnected(server_id: ServerId, region: Option<Region>) -> Self {
        Self {
            server_id,
            region,
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            last_error: None,
            created_at: None,
        }
    }
}

/// Connection record for one managed server.
#[derive(Debug, Clone)]
pub struct ServerConnection {
    server_id: ServerId,
    region: Region,
    state: ConnectionState,
    reconnect_attempts: u32,
    last_error: Option<String>,
    created_at: u64,
}

impl ServerConnection {
    /// Creates a record in the `Disconnected` state.
    pub fn new(server_id: ServerId, region: Region, created_at: u64) -> Self {
        Self {
            server_id,
            region,
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            last_error: None,
            created_at,
        }
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// `Disconnected | Reconnecting → Connecting`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when already `Connecting` or `Connected`.
    pub fn begin_connect(&mut self) -> Result<(), TransitionError> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {
                self.state = ConnectionState::Connecting;
                Ok(())
            }
            from => Err(self.illegal(from, ConnectionState::Connecting)),
        }
    }

    /// `Connecting → Connected`; resets the attempt counter and clears the
    /// last error so the next failure starts from the base delay again.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] unless currently `Connecting`.
    pub fn mark_connected(&mut self) -> Result<(), TransitionError> {
        match self.state {
            ConnectionState::Connecting => {
                self.state = ConnectionState::Connected;
                self.reconnect_attempts = 0;
                self.last_error = None;
                Ok(())
            }
            from => Err(self.illegal(from, ConnectionState::Connected)),
        }
    }

    /// `Connecting | Connected → Reconnecting`.
    ///
    /// Records `error`, increments the attempt counter and returns how long to
    /// wait before the next `begin_connect`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] from `Disconnected` or `Reconnecting`.
    pub fn mark_failed(
        &mut self,
        error: impl Into<String>,
        policy: &BackoffPolicy,
    ) -> Result<Duration, TransitionError> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                let delay = policy.delay(self.reconnect_attempts);
                self.state = ConnectionState::Reconnecting;
                self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
                self.last_error = Some(error.into());
                Ok(delay)
            }
            from => Err(self.illegal(from, ConnectionState::Reconnecting)),
        }
    }

    /// Any state → `Disconnected`.
    pub fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Returns a serialisable snapshot.
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            server_id: self.server_id,
            region: Some(self.region),
            state: self.state,
            reconnect_attempts: self.reconnect_attempts,
            last_error: self.last_error.clone(),
            created_at: Some(self.created_at),
        }
    }

    fn illegal(&self, from: ConnectionState, to: ConnectionState) -> TransitionError {
        TransitionError {
            server_id: self.server_id,
            from,
            to,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(100),
            cap: Duration::from_millis(1_000),
            jitter: Duration::ZERO,
        }
    }

    fn make_connection() -> ServerConnection {
        ServerConnection::new(42, Region::Eu, 1_700_000_000_000)
    }

    #[test]
    fn test_new_connection_starts_disconnected() {
        let conn = make_connection();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.reconnect_attempts(), 0);
        assert!(conn.last_error().is_none());
    }

    #[test]
    fn test_happy_path_reaches_connected() {
        // Arrange
        let mut conn = make_connection();

        // Act
        conn.begin_connect().unwrap();
        conn.mark_connected().unwrap();

        // Assert
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_failure_moves_to_reconnecting_and_counts_attempt() {
        let mut conn = make_connection();
        conn.begin_connect().unwrap();

        let delay = conn.mark_failed("handshake refused", &no_jitter()).unwrap();

        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        assert_eq!(conn.reconnect_attempts(), 1);
        assert_eq!(conn.last_error(), Some("handshake refused"));
        assert_eq!(delay, Duration::from_millis(100));
    }

    #[test]
    fn test_connected_transport_error_moves_to_reconnecting() {
        let mut conn = make_connection();
        conn.begin_connect().unwrap();
        conn.mark_connected().unwrap();

        conn.mark_failed("reset by peer", &no_jitter()).unwrap();

        assert_eq!(conn.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn test_delay_grows_until_cap_then_resets_after_success() {
        // Arrange
        let policy = no_jitter();
        let mut conn = make_connection();
        let mut delays = Vec::new();

        // Act: fail six times in a row
        for _ in 0..6 {
            conn.begin_connect().unwrap();
            delays.push(conn.mark_failed("refused", &policy).unwrap());
        }
        conn.begin_connect().unwrap();
        conn.mark_connected().unwrap();
        delays.push(conn.mark_failed("dropped", &policy).unwrap());

        // Assert
        let ms: Vec<u128> = delays.iter().map(Duration::as_millis).collect();
        assert_eq!(ms, vec![100, 200, 400, 800, 1_000, 1_000, 100]);
    }

    #[test]
    fn test_base_delay_is_non_decreasing_and_capped() {
        let policy = BackoffPolicy::default();
        let mut previous = Duration::ZERO;
        for attempts in 0..64 {
            let d = policy.base_delay(attempts);
            assert!(d >= previous, "delay decreased at attempt {attempts}");
            assert!(d <= policy.cap);
            previous = d;
        }
    }

    #[test]
    fn test_jittered_delay_stays_within_bounds() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            cap: Duration::from_millis(1_000),
            jitter: Duration::from_millis(50),
        };
        for _ in 0..100 {
            let d = policy.delay(2);
            assert!(d >= Duration::from_millis(400));
            assert!(d <= Duration::from_millis(450));
        }
    }

    #[test]
    fn test_begin_connect_rejected_while_connected() {
        let mut conn = make_connection();
        conn.begin_connect().unwrap();
        conn.mark_connected().unwrap();

        let err = conn.begin_connect().unwrap_err();

        assert_eq!(err.from, ConnectionState::Connected);
        assert_eq!(err.to, ConnectionState::Connecting);
    }

    #[test]
    fn test_mark_failed_rejected_from_disconnected() {
        let mut conn = make_connection();
        assert!(conn.mark_failed("x", &no_jitter()).is_err());
    }

    #[test]
    fn test_mark_disconnected_is_legal_from_any_state() {
        let mut conn = make_connection();
        conn.begin_connect().unwrap();
        conn.mark_disconnected();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_status_snapshot_reflects_record() {
        let mut conn = make_connection();
        conn.begin_connect().unwrap();
        conn.mark_failed("timeout", &no_jitter()).unwrap();

        let status = conn.status();

        assert_eq!(status.server_id, 42);
        assert_eq!(status.region, Some(Region::Eu));
        assert_eq!(status.state, ConnectionState::Reconnecting);
        assert_eq!(status.reconnect_attempts, 1);
        assert_eq!(status.last_error.as_deref(), Some("timeout"));
    }
}
