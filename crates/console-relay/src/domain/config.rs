//! Relay configuration.
//!
//! [`ConsoleConfig`] is the single source of truth for every runtime setting
//! of the relay.  It is a plain struct: the infrastructure layer fills it
//! from the TOML file and CLI flags, tests build it directly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use console_core::buffer::announce::DEFAULT_COOLDOWN;
use console_core::buffer::ring::DEFAULT_CAPACITY;
use console_core::{BackoffPolicy, CorrelationConfig};

/// What [`SharedRateLimiter::acquire`](crate::application::SharedRateLimiter::acquire)
/// does when a category has no free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitMode {
    /// Wait until the oldest call leaves the window.
    #[default]
    Block,
    /// Fail immediately with `RateLimitExceeded`.
    Reject,
}

/// All runtime configuration for a [`ConsoleManager`](crate::ConsoleManager).
///
/// # Example
///
/// ```rust
/// use console_relay::ConsoleConfig;
///
/// let cfg = ConsoleConfig::default();
/// assert_eq!(cfg.buffer_capacity, 1000);
/// assert_eq!(cfg.correlation.timeout.as_secs(), 10);
/// ```
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// WebSocket URL of the upstream control plane.
    pub endpoint: String,

    /// Bearer token sent in the upgrade request and in `connection_init`.
    pub token: Option<String>,

    /// Sub-protocol requested during the upgrade; `None` requests none.
    pub subprotocol: Option<String>,

    /// Reconnect delay schedule.
    pub backoff: BackoffPolicy,

    /// Upper bound on one handshake (upgrade + init + subscribe).
    pub connect_timeout: Duration,

    /// How often the worker pings an idle upstream socket.
    pub ping_interval: Duration,

    /// How long `disconnect` waits for the worker before aborting it.
    pub shutdown_grace: Duration,

    /// Messages retained per server.
    pub buffer_capacity: usize,

    /// Window during which repeated join announcements are suppressed.
    pub announcement_cooldown: Duration,

    /// Command timeout, grace window and match hints.
    pub correlation: CorrelationConfig,

    /// Period of the pending-command timeout sweep.
    pub sweep_interval: Duration,

    /// Rate-limit window shared by every connection.
    pub rate_limit_window: Duration,

    /// Calls admitted per window and category.
    pub rate_limit_max_calls: usize,

    pub rate_limit_mode: RateLimitMode,
}

impl Default for ConsoleConfig {
    /// | Field                 | Default                     |
    /// |-----------------------|-----------------------------|
    /// | endpoint              | `ws://127.0.0.1:8080/graphql` |
    /// | subprotocol           | `graphql-ws`                |
    /// | backoff               | 2 s base, 60 s cap, 500 ms jitter |
    /// | connect_timeout       | 10 s                        |
    /// | ping_interval         | 30 s                        |
    /// | shutdown_grace        | 2 s                         |
    /// | buffer_capacity       | 1000                        |
    /// | announcement_cooldown | 5 min                       |
    /// | command timeout       | 10 s                        |
    /// | sweep_interval        | 30 s                        |
    /// | rate limit            | 5 calls / 1 s, blocking     |
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080/graphql".to_string(),
            token: None,
            subprotocol: Some("graphql-ws".to_string()),
            backoff: BackoffPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(2),
            buffer_capacity: DEFAULT_CAPACITY,
            announcement_cooldown: DEFAULT_COOLDOWN,
            correlation: CorrelationConfig::default(),
            sweep_interval: Duration::from_secs(30),
            rate_limit_window: Duration::from_secs(1),
            rate_limit_max_calls: 5,
            rate_limit_mode: RateLimitMode::Block,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_matches_policy_defaults() {
        let cfg = ConsoleConfig::default();
        assert_eq!(cfg.backoff, BackoffPolicy::default());
    }

    #[test]
    fn test_default_rate_limit_is_five_per_second_blocking() {
        let cfg = ConsoleConfig::default();
        assert_eq!(cfg.rate_limit_window, Duration::from_secs(1));
        assert_eq!(cfg.rate_limit_max_calls, 5);
        assert_eq!(cfg.rate_limit_mode, RateLimitMode::Block);
    }

    #[test]
    fn test_default_sweep_is_thirty_seconds() {
        assert_eq!(ConsoleConfig::default().sweep_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_rate_limit_mode_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&RateLimitMode::Reject).unwrap(), "\"reject\"");
        let mode: RateLimitMode = serde_json::from_str("\"block\"").unwrap();
        assert_eq!(mode, RateLimitMode::Block);
    }
}
